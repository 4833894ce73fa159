/// Code review tools
///
/// Static analysis helpers for Python source held in `state.code`, plus the
/// demo graph that chains them. Each tool reads what earlier tools wrote and
/// returns a delta with its own findings.

use crate::runtime::executor::Invocation;
use crate::workflow::{GraphDefinition, StateDelta};
use anyhow::Result;
use regex::Regex;
use serde_json::{json, Map, Value};

/// Tool table registered as builtins at startup
pub const TOOLS: &[(&str, fn(&Invocation) -> Result<StateDelta>)] = &[
    ("extract_functions", extract_functions),
    ("check_complexity", check_complexity),
    ("detect_issues", detect_issues),
    ("suggest_improvements", suggest_improvements),
    ("calculate_quality_score", calculate_quality_score),
    ("summarize_review", summarize_review),
];

/// Quality score the demo graph accepts without another improvement round
pub const QUALITY_THRESHOLD: f64 = 7.0;

const LONG_LINE: usize = 100;

pub const SAMPLE_CODE: &str = r#"
import os
import sys

def calculate_total(numbers):
    total = 0
    for num in numbers:
        if num > 0:
            total += num
        elif num < 0:
            total -= abs(num)
    return total

def process_data(data):
    # TODO: Add validation
    result = []
    for item in data:
        if item:
            if len(item) > 10:
                result.append(item[:10])
            else:
                result.append(item)
    return result

def complex_function(a, b, c, d, e):
    if a > 0:
        if b > 0:
            if c > 0:
                if d > 0:
                    if e > 0:
                        return a + b + c + d + e
                    else:
                        return a + b + c + d - e
                else:
                    return a + b + c - d
            else:
                return a + b - c
        else:
            return a - b
    else:
        return 0
"#;

/// extract → complexity → issues → improvements → quality, looping back to
/// improvements while the score is below the threshold (at most three times)
pub fn code_review_graph() -> Result<GraphDefinition> {
    let definition = serde_json::from_value(json!({
        "name": "Code Review Mini-Agent",
        "nodes": [
            "extract_functions",
            "check_complexity",
            "detect_issues",
            "suggest_improvements",
            {"name": "calculate_quality", "function": "calculate_quality_score"},
            {"name": "final_review", "function": "summarize_review"}
        ],
        "start": "extract_functions",
        "edges": {
            "extract_functions": {"type": "direct", "target": "check_complexity"},
            "check_complexity": {"type": "direct", "target": "detect_issues"},
            "detect_issues": {"type": "direct", "target": "suggest_improvements"},
            "suggest_improvements": {"type": "direct", "target": "calculate_quality"},
            "calculate_quality": {
                "type": "looping",
                "condition": format!("quality_score < {}", QUALITY_THRESHOLD),
                "continue_to": "suggest_improvements",
                "exit_to": "final_review",
                "max_iterations": 3
            }
        }
    }))?;
    Ok(definition)
}

fn code(invocation: &Invocation) -> &str {
    invocation.state.get("code").and_then(Value::as_str).unwrap_or("")
}

fn array<'a>(invocation: &'a Invocation, key: &str) -> &'a [Value] {
    invocation
        .state
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn number(invocation: &Invocation, key: &str) -> f64 {
    invocation.state.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn into_delta(value: Value) -> StateDelta {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Find `def name(...):` definitions with their 1-based line numbers
pub fn extract_functions(invocation: &Invocation) -> Result<StateDelta> {
    let code = code(invocation);
    let pattern = Regex::new(r"def\s+(\w+)\s*\([^)]*\):")?;

    let functions: Vec<Value> = pattern
        .captures_iter(code)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let name = captures.get(1)?;
            let line = code[..whole.start()].matches('\n').count() + 1;
            Some(json!({"name": name.as_str(), "line": line}))
        })
        .collect();

    Ok(into_delta(json!({
        "function_count": functions.len(),
        "functions": functions,
    })))
}

/// Branch-count complexity of each function body
pub fn check_complexity(invocation: &Invocation) -> Result<StateDelta> {
    let lines: Vec<&str> = code(invocation).lines().collect();
    let functions = array(invocation, "functions");

    let mut starts: Vec<(String, usize)> = functions
        .iter()
        .filter_map(|function| {
            let name = function.get("name")?.as_str()?.to_string();
            let line = function.get("line")?.as_u64()? as usize;
            Some((name, line))
        })
        .collect();
    starts.sort_by_key(|(_, line)| *line);

    let mut scores = Vec::with_capacity(starts.len());
    let mut total = 0u64;
    for (index, (name, line)) in starts.iter().enumerate() {
        let end = starts.get(index + 1).map(|(_, next)| next - 1).unwrap_or(lines.len());
        let body = lines
            .get(line.saturating_sub(1)..end.min(lines.len()))
            .unwrap_or(&[]);

        let branches: usize = body
            .iter()
            .map(|text| {
                ["if ", "for ", "while ", "except"]
                    .iter()
                    .map(|keyword| text.matches(keyword).count())
                    .sum::<usize>()
            })
            .sum();
        let complexity = 1 + branches as u64;
        total += complexity;

        scores.push(json!({
            "function": name,
            "complexity": complexity,
            "level": if complexity > 5 { "high" } else { "low" },
        }));
    }

    let average = if scores.is_empty() { 0.0 } else { total as f64 / scores.len() as f64 };
    Ok(into_delta(json!({
        "complexity_scores": scores,
        "average_complexity": average,
    })))
}

/// Style, documentation and maintenance findings per line
pub fn detect_issues(invocation: &Invocation) -> Result<StateDelta> {
    let code = code(invocation);
    let lines: Vec<&str> = code.lines().collect();
    let mut issues = Vec::new();

    let mut issue = |kind: &str, line: usize, message: &str, severity: &str| {
        issues.push(json!({"type": kind, "line": line, "message": message, "severity": severity}));
    };

    for (index, line) in lines.iter().enumerate() {
        let number = index + 1;
        let trimmed = line.trim();

        if line.chars().count() > LONG_LINE {
            issue("style", number, "Line too long (>100 characters)", "low");
        }

        if trimmed.starts_with("def ") && trimmed.contains(':') {
            let documented = lines
                .iter()
                .skip(number)
                .take(3)
                .any(|next| next.contains("\"\"\"") || next.contains("'''"));
            if !documented {
                issue("documentation", number, "Function missing docstring", "medium");
            }
        }

        if trimmed.starts_with("except:") {
            issue("error_handling", number, "Bare except clause", "high");
        }

        if line.contains("TODO") || line.contains("FIXME") {
            issue("maintenance", number, "TODO/FIXME comment found", "low");
        }

        if trimmed.starts_with("print(") {
            issue("debugging", number, "Leftover print statement", "low");
        }
    }

    let mut severity_counts = Map::new();
    for severity in ["high", "medium", "low"] {
        let count = issues.iter().filter(|i| i["severity"] == severity).count();
        severity_counts.insert(severity.to_string(), json!(count));
    }

    Ok(into_delta(json!({
        "issue_count": issues.len(),
        "issues": issues,
        "severity_counts": severity_counts,
    })))
}

/// Turn complexity and issue findings into suggestions
pub fn suggest_improvements(invocation: &Invocation) -> Result<StateDelta> {
    let mut suggestions = Vec::new();

    for score in array(invocation, "complexity_scores") {
        let complexity = score["complexity"].as_u64().unwrap_or(0);
        let function = score["function"].as_str().unwrap_or("unknown");
        if complexity > 10 {
            suggestions.push(json!({
                "type": "refactor", "target": function, "priority": "high",
                "suggestion": format!("Consider breaking down {} (complexity: {})", function, complexity),
            }));
        } else if complexity > 5 {
            suggestions.push(json!({
                "type": "refactor", "target": function, "priority": "medium",
                "suggestion": format!("Consider simplifying {} (complexity: {})", function, complexity),
            }));
        }
    }

    let issues = array(invocation, "issues");
    let count = |kind: &str| issues.iter().filter(|issue| issue["type"] == kind).count();

    if count("documentation") > 2 {
        suggestions.push(json!({
            "type": "documentation", "target": "general", "priority": "medium",
            "suggestion": "Add docstrings to improve code documentation",
        }));
    }
    if count("style") > 5 {
        suggestions.push(json!({
            "type": "style", "target": "general", "priority": "low",
            "suggestion": "Consider using a code formatter (black, autopep8)",
        }));
    }
    if count("error_handling") > 0 {
        suggestions.push(json!({
            "type": "error_handling", "target": "general", "priority": "high",
            "suggestion": "Catch specific exception types instead of bare except",
        }));
    }

    let rounds = invocation.state.get("improvement_rounds").and_then(Value::as_u64).unwrap_or(0) + 1;
    Ok(into_delta(json!({
        "suggestion_count": suggestions.len(),
        "suggestions": suggestions,
        "improvement_rounds": rounds,
    })))
}

/// Score out of 10: deductions for complexity and issues, bonus for structure
pub fn calculate_quality_score(invocation: &Invocation) -> Result<StateDelta> {
    let function_count = number(invocation, "function_count");
    let average_complexity = number(invocation, "average_complexity");
    let severity = |level: &str| {
        invocation
            .state
            .get("severity_counts")
            .and_then(|counts| counts.get(level))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    };

    let mut score = 10.0;
    if average_complexity > 10.0 {
        score -= 3.0;
    } else if average_complexity > 5.0 {
        score -= 1.0;
    }
    score -= severity("high") * 2.0;
    score -= severity("medium");
    score -= severity("low") * 0.5;
    if function_count > 0.0 {
        score += 1.0;
    }
    let score: f64 = f64::clamp(score, 0.0, 10.0);

    Ok(into_delta(json!({
        "quality_score": score,
        "quality_level": quality_level(score),
    })))
}

pub fn quality_level(score: f64) -> &'static str {
    if score >= 8.0 {
        "excellent"
    } else if score >= 6.0 {
        "good"
    } else if score >= 4.0 {
        "fair"
    } else {
        "poor"
    }
}

/// Final verdict collected from the earlier tools
pub fn summarize_review(invocation: &Invocation) -> Result<StateDelta> {
    let score = number(invocation, "quality_score");
    let verdict = if score >= QUALITY_THRESHOLD { "approved" } else { "needs_work" };

    Ok(into_delta(json!({
        "review_summary": {
            "verdict": verdict,
            "quality_score": score,
            "quality_level": quality_level(score),
            "function_count": number(invocation, "function_count"),
            "issue_count": number(invocation, "issue_count"),
            "suggestion_count": number(invocation, "suggestion_count"),
            "improvement_rounds": number(invocation, "improvement_rounds"),
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::run::RunId;
    use crate::workflow::{CompiledGraph, WorkflowState};

    fn invocation(state: &WorkflowState) -> Invocation {
        Invocation {
            run_id: RunId::from("test"),
            node: "tool".to_string(),
            step: 1,
            state: state.clone(),
            params: Value::Null,
        }
    }

    fn apply(state: WorkflowState, tool: fn(&Invocation) -> Result<StateDelta>) -> WorkflowState {
        let delta = tool(&invocation(&state)).unwrap();
        state.merge(&delta)
    }

    fn sample() -> WorkflowState {
        WorkflowState::new(into_delta(json!({"code": SAMPLE_CODE})))
    }

    #[test]
    fn test_extract_functions_from_sample() {
        let state = apply(sample(), extract_functions);
        assert_eq!(state.get("function_count"), Some(&json!(3)));
        assert_eq!(state.get("functions.0.name"), Some(&json!("calculate_total")));
        assert_eq!(state.get("functions.0.line"), Some(&json!(5)));
        assert_eq!(state.get("functions.2.name"), Some(&json!("complex_function")));
    }

    #[test]
    fn test_complexity_is_per_function() {
        let state = apply(apply(sample(), extract_functions), check_complexity);
        let scores = state.get("complexity_scores").and_then(Value::as_array).unwrap();
        assert_eq!(scores.len(), 3);
        // the nested-if function is the most complex
        let complex = scores[2]["complexity"].as_u64().unwrap();
        assert!(complex > scores[0]["complexity"].as_u64().unwrap());
        assert_eq!(scores[2]["level"], json!("high"));
        assert!(state.get("average_complexity").and_then(Value::as_f64).unwrap() > 1.0);
    }

    #[test]
    fn test_detect_issues_in_sample() {
        let state = apply(sample(), detect_issues);
        // three undocumented functions and one TODO
        assert_eq!(state.get("severity_counts.medium"), Some(&json!(3)));
        assert_eq!(state.get("severity_counts.low"), Some(&json!(1)));
        assert_eq!(state.get("issue_count"), Some(&json!(4)));
    }

    #[test]
    fn test_empty_code_is_clean() {
        let empty = WorkflowState::default();
        let state = apply(apply(apply(empty, extract_functions), detect_issues), calculate_quality_score);
        assert_eq!(state.get("function_count"), Some(&json!(0)));
        assert_eq!(state.get("issue_count"), Some(&json!(0)));
        assert_eq!(state.get("quality_score"), Some(&json!(10.0)));
        assert_eq!(state.get("quality_level"), Some(&json!("excellent")));
    }

    #[test]
    fn test_quality_levels() {
        assert_eq!(quality_level(9.0), "excellent");
        assert_eq!(quality_level(6.5), "good");
        assert_eq!(quality_level(4.0), "fair");
        assert_eq!(quality_level(1.0), "poor");
    }

    #[test]
    fn test_suggest_improvements_counts_rounds() {
        let state = apply(apply(sample(), suggest_improvements), suggest_improvements);
        assert_eq!(state.get("improvement_rounds"), Some(&json!(2)));
    }

    #[test]
    fn test_demo_graph_compiles() {
        let graph = CompiledGraph::compile(code_review_graph().unwrap()).unwrap();
        assert_eq!(graph.start_node(), "extract_functions");
        assert!(graph.has_cycles());
        assert_eq!(graph.node("final_review").unwrap().function_name(), "summarize_review");
    }
}
