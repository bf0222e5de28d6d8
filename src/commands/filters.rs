use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::info;

use crate::cli::CommonArgs;

#[derive(Debug, Deserialize)]
struct TopicsFile {
    targets: Vec<Topic>,
}

#[derive(Debug, Deserialize)]
struct Topic {
    target_id: String,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    entity_type: Option<String>,
}

/// Decides which entities take part in scoring. Applied to truth data, so
/// rejected entities contribute no positives.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    reject_twitter: bool,
    reject_wikipedia: bool,
    accepted: Option<BTreeSet<String>>,
}

impl EntityFilter {
    pub fn from_args(args: &CommonArgs) -> Result<Self> {
        if args.reject_twitter && args.reject_wikipedia {
            bail!("cannot score with no entities: both --reject-twitter and --reject-wikipedia set");
        }

        let mut accepted = None;
        if args.group.is_some() || args.entity_type.is_some() {
            let Some(topics_path) = &args.topics_path else {
                bail!("--group and --entity-type need --topics-path");
            };
            let topics = load_topic_targets(
                topics_path,
                args.group.as_deref(),
                args.entity_type.as_deref(),
            )?;
            accepted = Some(topics);
        }

        if let Some(restrict_path) = &args.restrict {
            let restricted = load_restrict_list(restrict_path)?;
            accepted = Some(match accepted {
                Some(topics) => topics.intersection(&restricted).cloned().collect(),
                None => restricted,
            });
        }

        if let Some(accepted) = &accepted {
            info!(entities = accepted.len(), "restricting scoring to listed entities");
        }

        Ok(Self {
            reject_twitter: args.reject_twitter,
            reject_wikipedia: args.reject_wikipedia,
            accepted,
        })
    }

    pub fn rejects(&self, entity_id: &str) -> bool {
        if self.reject_twitter && entity_id.contains("twitter.com") {
            return true;
        }
        if self.reject_wikipedia && entity_id.contains("wikipedia.org") {
            return true;
        }
        match &self.accepted {
            Some(accepted) => !accepted.contains(entity_id),
            None => false,
        }
    }
}

/// Targets whose group or entity type matches.
fn load_topic_targets(
    path: &Path,
    group: Option<&str>,
    entity_type: Option<&str>,
) -> Result<BTreeSet<String>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let topics: TopicsFile = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse topics file {}", path.display()))?;

    Ok(topics
        .targets
        .into_iter()
        .filter(|target| {
            let group_matches = group.is_some() && target.group.as_deref() == group;
            let type_matches =
                entity_type.is_some() && target.entity_type.as_deref() == entity_type;
            group_matches || type_matches
        })
        .map(|target| target.target_id)
        .collect())
}

fn load_restrict_list(path: &Path) -> Result<BTreeSet<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToOwned::to_owned)
        .collect())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args() -> CommonArgs {
        CommonArgs {
            run_dir: PathBuf::from("runs"),
            truth_path: PathBuf::from("truth"),
            output_dir: PathBuf::from("scores"),
            cutoff_step: 50,
            jobs: None,
            skip_entities_without_positives: false,
            reject_twitter: false,
            reject_wikipedia: false,
            group: None,
            entity_type: None,
            topics_path: None,
            restrict: None,
            debug: false,
        }
    }

    const TOPICS: &str = r#"{"targets": [
        {"target_id": "http://en.wikipedia.org/wiki/A", "group": "g1", "entity_type": "PER"},
        {"target_id": "https://twitter.com/b", "group": "g2", "entity_type": "PER"},
        {"target_id": "http://en.wikipedia.org/wiki/C", "group": "g2", "entity_type": "ORG"}
    ]}"#;

    #[test]
    fn rejecting_both_sources_is_a_configuration_error() {
        let mut args = args();
        args.reject_twitter = true;
        args.reject_wikipedia = true;
        assert!(EntityFilter::from_args(&args).is_err());
    }

    #[test]
    fn source_flags_reject_by_url() {
        let mut args = args();
        args.reject_twitter = true;
        let filter = EntityFilter::from_args(&args).expect("valid");
        assert!(filter.rejects("https://twitter.com/b"));
        assert!(!filter.rejects("http://en.wikipedia.org/wiki/A"));
    }

    #[test]
    fn group_needs_a_topics_file() {
        let mut args = args();
        args.group = Some("g1".to_string());
        assert!(EntityFilter::from_args(&args).is_err());
    }

    #[test]
    fn group_or_entity_type_selects_topics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let topics_path = dir.path().join("topics.json");
        fs::write(&topics_path, TOPICS).expect("write topics");

        let mut args = args();
        args.group = Some("g1".to_string());
        args.entity_type = Some("ORG".to_string());
        args.topics_path = Some(topics_path);
        let filter = EntityFilter::from_args(&args).expect("valid");

        assert!(!filter.rejects("http://en.wikipedia.org/wiki/A"));
        assert!(filter.rejects("https://twitter.com/b"));
        assert!(!filter.rejects("http://en.wikipedia.org/wiki/C"));
    }

    #[test]
    fn restrict_list_intersects_with_topics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let topics_path = dir.path().join("topics.json");
        let restrict_path = dir.path().join("restrict.txt");
        fs::write(&topics_path, TOPICS).expect("write topics");
        fs::write(
            &restrict_path,
            "# accepted\nhttps://twitter.com/b\nhttp://en.wikipedia.org/wiki/A\n",
        )
        .expect("write restrict");

        let mut args = args();
        args.group = Some("g2".to_string());
        args.topics_path = Some(topics_path);
        args.restrict = Some(restrict_path);
        let filter = EntityFilter::from_args(&args).expect("valid");

        assert!(!filter.rejects("https://twitter.com/b"));
        assert!(filter.rejects("http://en.wikipedia.org/wiki/A"));
        assert!(filter.rejects("http://en.wikipedia.org/wiki/C"));
    }
}
