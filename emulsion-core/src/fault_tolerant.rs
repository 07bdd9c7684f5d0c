//! Runs a set of independent subtasks to completion without letting one
//! failure cancel the others.

use std::future::Future;

use emulsion_model::TaskError;

/// One named unit of work plus its outcome.
pub struct SubtaskResult {
    pub name: &'static str,
    pub error: Option<TaskError>,
}

/// Runs every future in `tasks` concurrently and waits for all of them,
/// regardless of whether earlier ones failed. Each task reports its own
/// name so failures can be attributed back to a specific subtask slot in
/// the asset's status.
pub async fn run_all<F>(tasks: Vec<(&'static str, F)>) -> Vec<SubtaskResult>
where
    F: Future<Output = Result<(), String>>,
{
    let futures = tasks.into_iter().map(|(name, fut)| async move {
        let error = match fut.await {
            Ok(()) => None,
            Err(message) => Some(TaskError::new(name, message)),
        };
        SubtaskResult { name, error }
    });

    futures::future::join_all(futures).await
}

/// Collects only the errors out of a batch of subtask results, in the
/// order the subtasks were declared.
pub fn collect_errors(results: Vec<SubtaskResult>) -> Vec<TaskError> {
    results.into_iter().filter_map(|r| r.error).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_all_tasks_even_when_some_fail() {
        let tasks: Vec<(&'static str, _)> = vec![
            ("a", Box::pin(async { Ok(()) }) as std::pin::Pin<Box<dyn Future<Output = Result<(), String>> + Send>>),
            ("b", Box::pin(async { Err("boom".to_string()) })),
            ("c", Box::pin(async { Ok(()) })),
        ];
        let results = run_all(tasks).await;
        assert_eq!(results.len(), 3);
        let errors = collect_errors(results);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].task, "b");
    }
}
