//! Workflow discovery: groups the URL index into candidate workflows so a
//! host can present choices before one is selected.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::har::UrlInfo;

use super::url_identifier::UrlIdentifier;

/// A set of related requests forming a coherent user-visible operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGroup {
    /// Grouping key: host plus first path segment.
    pub key: String,
    /// Member URLs, in index order.
    pub urls: Vec<String>,
    /// Heuristic score of the best member under the session prompt.
    pub score: f64,
    /// Best-scoring member; the natural master candidate.
    pub master_candidate: String,
}

/// Group candidate URLs by host + first path segment, ranked by the best
/// member's heuristic score.
pub fn discover_workflows(
    identifier: &UrlIdentifier,
    prompt: &str,
    urls: &[UrlInfo],
) -> Vec<WorkflowGroup> {
    let mut groups: HashMap<String, Vec<&UrlInfo>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for info in identifier.prefilter(urls) {
        let host = info
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&info.url)
            .split(['/', '?'])
            .next()
            .unwrap_or("")
            .to_string();
        let first_segment = info
            .path()
            .split('/')
            .find(|s| !s.is_empty())
            .unwrap_or("")
            .to_string();
        let key = if first_segment.is_empty() {
            host
        } else {
            format!("{host}/{first_segment}")
        };
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(info);
    }

    let mut workflows: Vec<WorkflowGroup> = order
        .into_iter()
        .map(|key| {
            let members = &groups[&key];
            let scored: Vec<(f64, &UrlInfo)> = members
                .iter()
                .map(|info| (identifier.score(prompt, info).total, *info))
                .collect();
            let (best_score, best) = scored
                .iter()
                .cloned()
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
                .expect("group is never empty");
            WorkflowGroup {
                key,
                urls: members.iter().map(|info| info.url.clone()).collect(),
                score: best_score,
                master_candidate: best.url.clone(),
            }
        })
        .collect();

    workflows.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    workflows
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(method: &str, url: &str) -> UrlInfo {
        UrlInfo {
            url: url.to_string(),
            method: method.to_string(),
            request_content_type: None,
            response_content_type: Some("application/json".to_string()),
        }
    }

    #[test]
    fn test_groups_by_host_and_first_segment() {
        let urls = vec![
            info("GET", "https://api.example.com/api/search?q=x"),
            info("GET", "https://api.example.com/api/items/1"),
            info("POST", "https://auth.example.com/login"),
        ];
        let workflows = discover_workflows(&UrlIdentifier::new(), "search items", &urls);
        assert_eq!(workflows.len(), 2);
        let keys: Vec<&str> = workflows.iter().map(|w| w.key.as_str()).collect();
        assert!(keys.contains(&"api.example.com/api"));
        assert!(keys.contains(&"auth.example.com/login"));
    }

    #[test]
    fn test_ranked_by_best_member_and_names_master_candidate() {
        let urls = vec![
            info("POST", "https://auth.example.com/login"),
            info("GET", "https://api.example.com/api/search?q=contracts"),
            info("GET", "https://api.example.com/api/profile"),
        ];
        let workflows = discover_workflows(&UrlIdentifier::new(), "search for contracts", &urls);
        assert_eq!(workflows[0].key, "api.example.com/api");
        assert!(workflows[0].master_candidate.contains("search"));
        assert_eq!(workflows[0].urls.len(), 2);
    }

    #[test]
    fn test_empty_index_yields_no_workflows() {
        let workflows = discover_workflows(&UrlIdentifier::new(), "anything", &[]);
        assert!(workflows.is_empty());
    }
}
