//! Rule catalog: cgroups, types and rules loaded from the config directory.
//!
//! Files are found recursively and read in sorted order. `*.cgroups` are
//! loaded first, then `*.types`, then `*.rules`, so later kinds may refer to
//! earlier ones. Every non-comment line is one JSON object.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use ananicy_common::{
    AnanicyError, AnanicyResult, IoClass, IoLevel, Nice, OomScoreAdj, RtPrio, SchedPolicy,
};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::Verbosity;
use crate::cgroup::CpuQuota;

/// Attribute values a rule or type may set. Unset values are never enforced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    /// CPU niceness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nice: Option<Nice>,
    /// I/O class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ioclass: Option<IoClass>,
    /// I/O level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ionice: Option<IoLevel>,
    /// Scheduling policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sched: Option<SchedPolicy>,
    /// Realtime priority, used with fifo and rr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtprio: Option<RtPrio>,
    /// OOM score adjustment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oom_score_adj: Option<OomScoreAdj>,
    /// Name of a configured cgroup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroup: Option<String>,
}

impl Attributes {
    /// Fill every unset value from `defaults`.
    pub fn inherit(&mut self, defaults: &Self) {
        self.nice = self.nice.or(defaults.nice);
        self.ioclass = self.ioclass.or(defaults.ioclass);
        self.ionice = self.ionice.or(defaults.ionice);
        self.sched = self.sched.or(defaults.sched);
        self.rtprio = self.rtprio.or(defaults.rtprio);
        self.oom_score_adj = self.oom_score_adj.or(defaults.oom_score_adj);
        if self.cgroup.is_none() {
            self.cgroup.clone_from(&defaults.cgroup);
        }
    }
}

/// Named template of attribute values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDefinition {
    /// Type name.
    #[serde(rename = "type")]
    pub name: String,
    /// Default values.
    #[serde(flatten)]
    pub attributes: Attributes,
}

/// A rule with its type already merged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleDefinition {
    /// Command name to match.
    pub name: String,
    /// Tokens that must all appear in the command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmdlines: Option<BTreeSet<String>>,
    /// Type the rule inherited from.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Resolved values.
    #[serde(flatten)]
    pub attributes: Attributes,
}

/// A CPU-limited cgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CgroupDefinition<'a> {
    /// Cgroup name.
    #[serde(rename = "cgroup")]
    pub name: &'a str,
    /// Share of total CPU time, in percent.
    #[serde(rename = "CPUQuota")]
    pub cpu_quota: u8,
}

impl CgroupDefinition<'_> {
    /// Quota values for a host with `cores` CPUs.
    #[must_use]
    pub fn quota(&self, cores: u64) -> CpuQuota {
        CpuQuota::new(self.cpu_quota, cores)
    }
}

#[derive(Deserialize)]
struct CgroupLine {
    cgroup: Option<String>,
    #[serde(rename = "CPUQuota")]
    cpu_quota: Option<i64>,
}

#[derive(Deserialize)]
struct TypeLine {
    #[serde(rename = "type")]
    name: Option<String>,
    #[serde(flatten)]
    attributes: Attributes,
}

#[derive(Deserialize)]
struct RuleLine {
    name: Option<String>,
    #[serde(rename = "type")]
    type_name: Option<String>,
    cmdlines: Option<BTreeSet<String>>,
    #[serde(flatten)]
    attributes: Attributes,
}

/// Immutable set of rules, types and cgroups.
#[derive(Debug, Default)]
pub struct RuleCatalog {
    cgroups: BTreeMap<String, u8>,
    types: BTreeMap<String, TypeDefinition>,
    rules: BTreeMap<String, Vec<RuleDefinition>>,
}

impl RuleCatalog {
    /// Load every `*.cgroups`, `*.types` and `*.rules` file under `dir`.
    pub fn load(dir: &Path, verbosity: &Verbosity) -> AnanicyResult<Self> {
        if !dir.is_dir() {
            return Err(AnanicyError::config(format!("Missing dir: {}", dir.display())));
        }

        let files = find_files(dir)?;
        let mut catalog = Self::default();

        for path in with_extension(&files, "cgroups") {
            if verbosity.cgroup_load {
                tracing::info!(path = %path.display(), "Load cgroups");
            }
            catalog.load_file(path, Self::add_cgroup_line)?;
        }

        for path in with_extension(&files, "types") {
            if verbosity.type_load {
                tracing::info!(path = %path.display(), "Load types");
            }
            catalog.load_file(path, Self::add_type_line)?;
        }

        for path in with_extension(&files, "rules") {
            if verbosity.rule_load {
                tracing::info!(path = %path.display(), "Load rules");
            }
            catalog.load_file(path, Self::add_rule_line)?;
        }

        if catalog.rule_count() == 0 {
            return Err(AnanicyError::config("No rules loaded"));
        }

        tracing::debug!(
            cgroups = catalog.cgroups.len(),
            types = catalog.types.len(),
            rules = catalog.rule_count(),
            "Loaded rule catalog"
        );
        Ok(catalog)
    }

    fn load_file(
        &mut self,
        path: &Path,
        mut add: impl FnMut(&mut Self, &str) -> AnanicyResult<()>,
    ) -> AnanicyResult<()> {
        let content = fs::read_to_string(path)?;
        for (index, line) in content.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.len() < 2 {
                continue;
            }
            add(self, line).map_err(|e| AnanicyError::ConfigLine {
                path: path.to_path_buf(),
                line: index + 1,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Add one `{"cgroup": ..., "CPUQuota": ...}` line.
    pub fn add_cgroup_line(&mut self, line: &str) -> AnanicyResult<()> {
        let raw: CgroupLine = serde_json::from_str(line)?;
        let name = raw
            .cgroup
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AnanicyError::config("Missing \"cgroup\""))?;
        let quota = raw
            .cpu_quota
            .filter(|quota| *quota != 0)
            .ok_or_else(|| AnanicyError::config("Missing \"CPUQuota\""))?;
        let quota = u8::try_from(quota)
            .ok()
            .filter(|quota| *quota <= 100)
            .ok_or_else(|| AnanicyError::OutOfRange {
                field: "CPUQuota",
                value: quota.to_string(),
                expected: "1..100",
            })?;

        self.cgroups.insert(name, quota);
        Ok(())
    }

    /// Add one `{"type": ..., ...}` line.
    pub fn add_type_line(&mut self, line: &str) -> AnanicyResult<()> {
        let raw: TypeLine = serde_json::from_str(line)?;
        let name = raw
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AnanicyError::config("Missing \"type\""))?;
        self.validate(&raw.attributes)?;

        self.types.insert(
            name.clone(),
            TypeDefinition {
                name,
                attributes: raw.attributes,
            },
        );
        Ok(())
    }

    /// Add one `{"name": ..., ...}` line, merging in its type.
    ///
    /// A rule with the same name and command line tokens as an earlier one
    /// replaces it in place.
    pub fn add_rule_line(&mut self, line: &str) -> AnanicyResult<()> {
        let raw: RuleLine = serde_json::from_str(line)?;
        let name = raw
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AnanicyError::config("Missing \"name\""))?;

        let mut attributes = raw.attributes;
        if let Some(type_name) = &raw.type_name {
            let defaults = self.types.get(type_name).ok_or_else(|| {
                AnanicyError::config(format!("\"type\": \"{type_name}\" not defined"))
            })?;
            attributes.inherit(&defaults.attributes);
        }
        self.validate(&attributes)?;

        let rule = RuleDefinition {
            name,
            cmdlines: raw.cmdlines.filter(|tokens| !tokens.is_empty()),
            type_name: raw.type_name,
            attributes,
        };

        let rules = self.rules.entry(rule.name.clone()).or_default();
        match rules.iter_mut().find(|existing| existing.cmdlines == rule.cmdlines) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }

    fn validate(&self, attributes: &Attributes) -> AnanicyResult<()> {
        if let Some(policy) = attributes.sched.filter(|policy| !policy.is_settable()) {
            return Err(AnanicyError::InvalidValue {
                field: "sched",
                value: policy.to_string(),
            });
        }
        if let Some(cgroup) = attributes.cgroup.as_deref() {
            if !self.cgroups.contains_key(cgroup) {
                return Err(AnanicyError::config(format!(
                    "\"cgroup\": \"{cgroup}\" not defined"
                )));
            }
        }
        Ok(())
    }

    /// Rules for a command name, in load order.
    #[must_use]
    pub fn rules_named(&self, name: &str) -> &[RuleDefinition] {
        self.rules.get(name).map_or(&[], Vec::as_slice)
    }

    /// Every rule, grouped by name.
    pub fn rules(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.values().flatten()
    }

    /// Number of rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Every type.
    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    /// A type by name.
    #[must_use]
    pub fn type_named(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    /// Every cgroup.
    pub fn cgroups(&self) -> impl Iterator<Item = CgroupDefinition<'_>> {
        self.cgroups.iter().map(|(name, quota)| CgroupDefinition {
            name,
            cpu_quota: *quota,
        })
    }
}

fn find_files(dir: &Path) -> AnanicyResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| AnanicyError::Io(e.into()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn with_extension<'a>(files: &'a [PathBuf], extension: &'a str) -> impl Iterator<Item = &'a Path> {
    files
        .iter()
        .filter(move |path| path.extension().is_some_and(|ext| ext == extension))
        .map(PathBuf::as_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> RuleCatalog {
        let mut catalog = RuleCatalog::default();
        catalog
            .add_cgroup_line(r#"{"cgroup": "cpu80", "CPUQuota": 80}"#)
            .unwrap();
        catalog
            .add_type_line(
                r#"{"type": "Game", "nice": -5, "ioclass": "best-effort", "ionice": 1, "sched": "rr", "rtprio": 10, "oom_score_adj": -100, "cgroup": "cpu80"}"#,
            )
            .unwrap();
        catalog
    }

    #[test]
    fn rule_inherits_unset_type_values() {
        let mut catalog = catalog();
        catalog
            .add_rule_line(r#"{"name": "supertux", "type": "Game", "nice": 3}"#)
            .unwrap();

        let rule = &catalog.rules_named("supertux")[0];
        let game = &catalog.type_named("Game").unwrap().attributes;
        assert_eq!(rule.attributes.nice, Some(Nice::new(3).unwrap()));
        assert_eq!(rule.attributes.ioclass, game.ioclass);
        assert_eq!(rule.attributes.ionice, game.ionice);
        assert_eq!(rule.attributes.sched, game.sched);
        assert_eq!(rule.attributes.rtprio, game.rtprio);
        assert_eq!(rule.attributes.oom_score_adj, game.oom_score_adj);
        assert_eq!(rule.attributes.cgroup.as_deref(), Some("cpu80"));
    }

    #[test]
    fn explicit_zero_is_kept() {
        let mut catalog = catalog();
        catalog
            .add_rule_line(r#"{"name": "make", "type": "Game", "nice": 0, "oom_score_adj": 0}"#)
            .unwrap();
        let rule = &catalog.rules_named("make")[0];
        assert_eq!(rule.attributes.nice, Some(Nice::new(0).unwrap()));
        assert_eq!(rule.attributes.oom_score_adj, Some(OomScoreAdj::new(0).unwrap()));
    }

    #[test]
    fn unset_attributes_stay_unset() {
        let mut catalog = RuleCatalog::default();
        catalog.add_rule_line(r#"{"name": "cc1", "nice": 19}"#).unwrap();
        let rule = &catalog.rules_named("cc1")[0];
        assert_eq!(rule.attributes.ioclass, None);
        assert_eq!(rule.attributes.sched, None);
        assert_eq!(rule.attributes.cgroup, None);
    }

    #[test]
    fn same_key_replaces_in_place() {
        let mut catalog = RuleCatalog::default();
        catalog.add_rule_line(r#"{"name": "java", "nice": 1}"#).unwrap();
        catalog
            .add_rule_line(r#"{"name": "java", "cmdlines": ["minecraft"], "nice": 2}"#)
            .unwrap();
        catalog.add_rule_line(r#"{"name": "java", "nice": 3}"#).unwrap();

        let rules = catalog.rules_named("java");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].cmdlines, None);
        assert_eq!(rules[0].attributes.nice, Some(Nice::new(3).unwrap()));
        assert_eq!(catalog.rule_count(), 2);
    }

    #[test]
    fn empty_cmdlines_match_everything() {
        let mut catalog = RuleCatalog::default();
        catalog
            .add_rule_line(r#"{"name": "bash", "cmdlines": [], "nice": 1}"#)
            .unwrap();
        assert_eq!(catalog.rules_named("bash")[0].cmdlines, None);
    }

    #[test]
    fn dangling_references_are_rejected() {
        let mut catalog = catalog();
        let err = catalog
            .add_rule_line(r#"{"name": "a", "type": "Missing"}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: \"type\": \"Missing\" not defined");
        assert!(catalog.add_rule_line(r#"{"name": "a", "cgroup": "nope"}"#).is_err());
        assert!(catalog.add_type_line(r#"{"type": "T", "cgroup": "nope"}"#).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut catalog = RuleCatalog::default();
        assert!(catalog.add_rule_line(r#"{"name": "a", "nice": 20}"#).is_err());
        assert!(catalog.add_rule_line(r#"{"name": "a", "ionice": 8}"#).is_err());
        assert!(catalog.add_rule_line(r#"{"name": "a", "rtprio": 0}"#).is_err());
        assert!(catalog.add_rule_line(r#"{"name": "a", "oom_score_adj": 1001}"#).is_err());
        assert!(catalog.add_rule_line(r#"{"name": "a", "sched": "deadline"}"#).is_err());
        assert!(catalog.add_cgroup_line(r#"{"cgroup": "c", "CPUQuota": 101}"#).is_err());
        assert!(catalog.add_cgroup_line(r#"{"cgroup": "c", "CPUQuota": 0}"#).is_err());
        assert_eq!(catalog.rule_count(), 0);
    }

    #[test]
    fn load_walks_directory_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("00-default");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            dir.path().join("00-cgroups.cgroups"),
            "# CPU limited\n{\"cgroup\": \"cpu50\", \"CPUQuota\": 50}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("00-types.types"),
            "{\"type\": \"BG_CPUIO\", \"nice\": 16, \"ioclass\": \"idle\", \"cgroup\": \"cpu50\"}\n",
        )
        .unwrap();
        fs::write(
            nested.join("compilers.rules"),
            "{\"name\": \"cc1\", \"type\": \"BG_CPUIO\"}\n\n{\"name\": \"rustc\", \"nice\": 19} # comment\n",
        )
        .unwrap();
        fs::write(nested.join("README"), "not a rule file").unwrap();

        let catalog = RuleCatalog::load(dir.path(), &Verbosity::quiet()).unwrap();
        assert_eq!(catalog.rule_count(), 2);
        assert_eq!(catalog.cgroups().count(), 1);
        let cc1 = &catalog.rules_named("cc1")[0];
        assert_eq!(cc1.attributes.ioclass, Some(IoClass::Idle));
        assert_eq!(cc1.attributes.cgroup.as_deref(), Some("cpu50"));
    }

    #[test]
    fn load_reports_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.rules");
        fs::write(&path, "{\"name\": \"ok\"}\n{\"name\": \"bad\", \"nice\": 40}\n").unwrap();

        match RuleCatalog::load(dir.path(), &Verbosity::quiet()) {
            Err(AnanicyError::ConfigLine { path: p, line, .. }) => {
                assert_eq!(p, path);
                assert_eq!(line, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn load_requires_rules() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuleCatalog::load(dir.path(), &Verbosity::quiet()).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: No rules loaded");

        let err = RuleCatalog::load(&dir.path().join("missing"), &Verbosity::quiet()).unwrap_err();
        assert!(err.to_string().contains("Missing dir"));
    }
}
