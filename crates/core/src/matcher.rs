use crate::models::{FailedJobSet, FailureRule, RuleTable};

/// Returns the first rule, in table order, whose job is among the failed jobs.
///
/// When several rules match, the one listed first in the table wins regardless
/// of which job failed first. The same holds for duplicate job names.
pub fn find_failure_rule<'a>(
    failed_jobs: &FailedJobSet,
    rules: &'a RuleTable,
) -> Option<&'a FailureRule> {
    if failed_jobs.is_empty() {
        return None;
    }
    rules.rules().iter().find(|rule| failed_jobs.contains(&rule.job_name))
}
