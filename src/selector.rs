//! Template selection
//!
//! Given a workload label, filters the fleet's templates down to the eligible
//! ones and orders them by a deterministic preference. The ordering is a
//! total order over an explicit rank key computed once per template, so the
//! tie-break policy is data rather than comparator branches:
//!
//! 1. templates in their error cool-down sort last;
//! 2. the named preferred build classes win outright, in list order;
//! 3. `c.`-prefixed (high-capacity) templates beat the rest;
//! 4. templates accepting label-less jobs rank below labelled-only ones;
//! 5. name ascending, for determinism only.

use crate::config::TemplateConfig;
use std::collections::BTreeSet;
use tracing::debug;

/// Preferred high-capacity template identities, best first. The first of
/// these an eligible template matches wins outright.
pub const PREFERRED_TEMPLATES: [&str; 3] = [
    "c.16core.build.neon",
    "c.8core.build.neon",
    "c.4core.build.neon",
];

/// Name prefix marking high-capacity template classes.
pub const HIGH_CAPACITY_PREFIX: &str = "c.";

/// A workload label to provision capacity for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    name: String,
}

impl Label {
    /// Create a label from its display name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The label's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this label is served by the given label set.
    pub fn matches(&self, label_set: &BTreeSet<String>) -> bool {
        label_set.contains(&self.name)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Ordinal rank buckets for one template; smaller sorts first. Field order is
/// priority order, the derived `Ord` does the rest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RankKey {
    erroring: bool,
    preferred: usize,
    standard_capacity: bool,
    labelless: bool,
    name: String,
}

fn rank_key(template: &TemplateConfig) -> RankKey {
    RankKey {
        erroring: template.is_erroring(),
        preferred: PREFERRED_TEMPLATES
            .iter()
            .position(|n| template.name == *n)
            .unwrap_or(usize::MAX),
        standard_capacity: !template.name.starts_with(HIGH_CAPACITY_PREFIX),
        labelless: template.labelless_jobs_allowed,
        name: template.name.clone(),
    }
}

/// Whether a template may serve the given workload label.
pub fn is_eligible(template: &TemplateConfig, label: Option<&Label>) -> bool {
    match label {
        None => template.label_set().is_empty() || template.labelless_jobs_allowed,
        Some(label) => label.matches(&template.label_set()),
    }
}

/// The eligible templates for a label, best first.
///
/// The result depends only on the templates' contents, never on their
/// declaration order.
pub fn eligible_ranked<'a>(
    templates: &'a [TemplateConfig],
    label: Option<&Label>,
) -> Vec<&'a TemplateConfig> {
    let mut matching: Vec<&TemplateConfig> = templates
        .iter()
        .filter(|t| is_eligible(t, label))
        .collect();
    matching.sort_by_cached_key(|t| rank_key(t));

    debug!(
        "Templates for label {:?}: {:?}",
        label.map(Label::name),
        matching.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
    );
    matching
}

/// The first ranked template passing the given capacity predicate, if any.
pub fn pick_first_under_cap<'a>(
    ranked: &[&'a TemplateConfig],
    mut under_cap: impl FnMut(&TemplateConfig) -> bool,
) -> Option<&'a TemplateConfig> {
    ranked.iter().copied().find(|t| under_cap(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthMarker, SizeConfig};
    use chrono::Utc;

    fn template(name: &str) -> TemplateConfig {
        TemplateConfig {
            name: name.to_string(),
            labels: String::new(),
            labelless_jobs_allowed: false,
            num_executors: 1,
            idle_termination_minutes: 10,
            image_id: "debian-12-x64".to_string(),
            region_id: "nyc1".to_string(),
            username: "agent".to_string(),
            workspace_path: "/home/agent".to_string(),
            ssh_port: 22,
            instance_cap: 0,
            install_monitoring: false,
            tags: String::new(),
            user_data: String::new(),
            init_script: String::new(),
            size: SizeConfig::new("s-1vcpu-1gb"),
            fallback_sizes: vec![],
            health: HealthMarker::default(),
        }
    }

    fn labelled(name: &str, labels: &str) -> TemplateConfig {
        let mut t = template(name);
        t.labels = labels.to_string();
        t
    }

    fn names(ranked: &[&TemplateConfig]) -> Vec<String> {
        ranked.iter().map(|t| t.name.clone()).collect()
    }

    #[test]
    fn test_eligibility() {
        let plain = template("plain");
        let lab = labelled("lab", "linux build");
        let mut open = template("open");
        open.labelless_jobs_allowed = true;

        let linux = Label::new("linux");
        let windows = Label::new("windows");

        assert!(is_eligible(&lab, Some(&linux)));
        assert!(!is_eligible(&lab, Some(&windows)));
        assert!(!is_eligible(&plain, Some(&linux)));

        // no label: label-set-free or labelless-allowed templates only
        assert!(is_eligible(&plain, None));
        assert!(is_eligible(&open, None));
        assert!(!is_eligible(&lab, None));
    }

    #[test]
    fn test_preferred_templates_win_in_list_order() {
        let templates = vec![
            template("c.4core.build.neon"),
            template("zz.builder"),
            template("c.16core.build.neon"),
            template("c.8core.build.neon"),
            template("c.other"),
        ];
        let ranked = eligible_ranked(&templates, None);
        assert_eq!(
            names(&ranked),
            vec![
                "c.16core.build.neon",
                "c.8core.build.neon",
                "c.4core.build.neon",
                "c.other",
                "zz.builder",
            ]
        );
    }

    #[test]
    fn test_high_capacity_prefix_beats_plain_names() {
        let templates = vec![template("aa.builder"), template("c.builder")];
        let ranked = eligible_ranked(&templates, None);
        assert_eq!(names(&ranked), vec!["c.builder", "aa.builder"]);
    }

    #[test]
    fn test_labelless_accepting_ranks_below() {
        let a = labelled("aaa", "linux");
        let mut b = labelled("bbb", "linux");
        b.labelless_jobs_allowed = true;
        let mut z = labelled("zzz", "linux");
        z.labelless_jobs_allowed = false;

        let templates = vec![b, a, z];
        let ranked = eligible_ranked(&templates, Some(&Label::new("linux")));
        assert_eq!(names(&ranked), vec!["aaa", "zzz", "bbb"]);
    }

    #[test]
    fn test_erroring_templates_sort_last() {
        let good = template("zz.slow");
        let bad = template("c.16core.build.neon");
        bad.health.mark_unhealthy_at(Utc::now());

        let templates = vec![bad, good];
        let ranked = eligible_ranked(&templates, None);
        assert_eq!(names(&ranked), vec!["zz.slow", "c.16core.build.neon"]);
    }

    #[test]
    fn test_ranking_is_declaration_order_independent() {
        let build = |order: &[&str]| -> Vec<String> {
            let templates: Vec<TemplateConfig> = order.iter().map(|n| template(n)).collect();
            names(&eligible_ranked(&templates, None))
        };

        let forward = build(&["a.1", "c.2", "b.3", "c.8core.build.neon", "d.4"]);
        let backward = build(&["d.4", "c.8core.build.neon", "b.3", "c.2", "a.1"]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_pick_first_under_cap() {
        let templates = vec![template("a.1"), template("b.2"), template("c.3")];
        let ranked = eligible_ranked(&templates, None);
        // "c.3" has the high-capacity prefix and ranks first
        assert_eq!(names(&ranked)[0], "c.3");

        let picked = pick_first_under_cap(&ranked, |t| t.name != "c.3");
        assert_eq!(picked.unwrap().name, "a.1");

        let picked = pick_first_under_cap(&ranked, |_| false);
        assert!(picked.is_none());
    }
}
