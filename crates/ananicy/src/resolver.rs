//! Matches threads to rules.

use ananicy_common::AnanicyResult;

use crate::config::{RuleCatalog, RuleDefinition};
use crate::process::ThreadRecord;

/// Looks up the rule for a thread.
///
/// The executable's file name is tried first, then the kernel short name if
/// it differs. Rules sharing a name are tried in load order and a rule with
/// command line tokens only matches when every token is a substring of the
/// space-joined argv.
#[derive(Debug, Clone, Copy)]
pub struct RuleResolver<'a> {
    catalog: &'a RuleCatalog,
}

impl<'a> RuleResolver<'a> {
    /// Resolve against `catalog`.
    #[must_use]
    pub const fn new(catalog: &'a RuleCatalog) -> Self {
        Self { catalog }
    }

    /// First matching rule, if any. argv is only read when a rule with
    /// command line tokens is considered.
    pub fn resolve(&self, record: &mut ThreadRecord) -> AnanicyResult<Option<&'a RuleDefinition>> {
        let cmd = record.cmd().to_owned();
        if let Some(rule) = self.first_match(&cmd, record)? {
            return Ok(Some(rule));
        }

        let short_name = record.stat_name()?.to_owned();
        if short_name.is_empty() || short_name == cmd {
            return Ok(None);
        }
        self.first_match(&short_name, record)
    }

    fn first_match(
        &self,
        name: &str,
        record: &mut ThreadRecord,
    ) -> AnanicyResult<Option<&'a RuleDefinition>> {
        for rule in self.catalog.rules_named(name) {
            let Some(tokens) = &rule.cmdlines else {
                return Ok(Some(rule));
            };
            let argv = record.cmdline()?.join(" ");
            if tokens.iter().all(|token| argv.contains(token.as_str())) {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }
}
