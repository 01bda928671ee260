//! Goals from Lean 3's textual proof states.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Goal, Hypothesis};

// `|` instead of `⊢` shows up in `conv` mode.
static CCL_SEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?sm)\A(?P<hyps>.*?)^[⊢|](?P<ccl>.*)").expect("CCL_SEP_RE regex is valid")
});

// Hypotheses with a body (`x : T := v`) are read as plain declarations.
static HYP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<names>.*?)\s*:\s*(?P<type>(?:.*|\n )+)(?:,\n|\z)")
        .expect("HYP_RE regex is valid")
});

static CASES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A\s*case\s+[^:].*").expect("CASES_RE regex is valid"));

/// Parse the `state` reported by an `info` query.
pub fn parse_goals(state: Option<&str>) -> Vec<Goal> {
    let state = match state {
        None | Some("no goals") => return Vec::new(),
        Some(state) => state,
    };
    let mut goals: Vec<&str> = state.split("\n\n").collect();
    if goals.len() > 1 {
        // Drop the leading "N goals" line.
        goals[0] = goals[0].find('\n').map_or("", |i| &goals[0][i..]);
    }
    goals.into_iter().map(parse_goal).collect()
}

fn parse_goal(goal: &str) -> Goal {
    let name = CASES_RE.find(goal).map(|m| m.as_str().trim().to_string());
    match CCL_SEP_RE.captures(goal) {
        Some(caps) => Goal {
            name,
            conclusion: unindent(&caps["ccl"]).trim().to_string(),
            hypotheses: parse_hyps(&caps["hyps"]),
        },
        None => Goal {
            name,
            conclusion: unindent(goal).trim().to_string(),
            hypotheses: Vec::new(),
        },
    }
}

fn parse_hyps(hyps: &str) -> Vec<Hypothesis> {
    HYP_RE
        .captures_iter(hyps.trim())
        .map(|caps| Hypothesis {
            names: caps["names"].split_whitespace().map(str::to_string).collect(),
            body: None,
            ty: unindent(&caps["type"]),
        })
        .collect()
}

fn unindent(text: &str) -> String {
    text.replace("\n  ", "\n")
}
