//! One-call harness for driving a pipeline end to end.

use crate::cancellation::CancellationToken;
use crate::envelope::Payload;
use crate::errors::PipelineError;
use crate::pipeline::Pipeline;

/// Outcome of [`run_to_completion`].
#[derive(Debug)]
pub struct PipelineRun<T> {
    /// What the output reader yielded: every value, or the error that ended
    /// the stream.
    pub outputs: Result<Vec<T>, PipelineError>,
    /// What `complete` (or the first failed write) returned.
    pub completion: Result<(), PipelineError>,
}

impl<T> PipelineRun<T> {
    /// Returns the outputs, panicking with the error otherwise.
    pub fn values(self) -> Vec<T> {
        match self.outputs {
            Ok(values) => values,
            Err(e) => panic!("pipeline output failed: {e}"),
        }
    }
}

/// Builds `pipeline`, writes every input, completes and collects the output.
///
/// The output is drained on a separate task while writing so that bounded
/// channels cannot stall the run. The pipeline is left undisposed.
pub async fn run_to_completion<T, I>(pipeline: &mut Pipeline<T>, inputs: I) -> PipelineRun<T>
where
    T: Payload,
    I: IntoIterator<Item = T>,
{
    let reader = match pipeline.build() {
        Ok(reader) => reader,
        Err(e) => {
            return PipelineRun {
                outputs: Err(e.clone()),
                completion: Err(e),
            };
        }
    };
    let collector = tokio::spawn(reader.collect_all());

    let token = CancellationToken::new();
    let mut write_error = None;
    for value in inputs {
        if let Err(e) = pipeline.write(value, &token).await {
            write_error = Some(e);
            break;
        }
    }

    let completion = pipeline.complete().await;
    let outputs = collector
        .await
        .unwrap_or_else(|e| Err(PipelineError::Internal(format!("output collector failed: {e}"))));

    PipelineRun {
        outputs,
        completion: write_error.map_or(completion, Err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageConfig;

    #[tokio::test]
    async fn test_empty_pipeline_reports_build_error() {
        let mut pipeline: Pipeline<i32> = Pipeline::default();
        let run = run_to_completion(&mut pipeline, [1, 2]).await;

        assert!(matches!(run.completion, Err(PipelineError::Configuration(_))));
        assert!(run.outputs.is_err());
    }

    #[tokio::test]
    async fn test_collects_outputs() {
        let mut pipeline = Pipeline::ordered(None);
        pipeline.add_stage(StageConfig::map(|v: i32| v + 1)).unwrap();

        let run = run_to_completion(&mut pipeline, 0..4).await;

        assert!(run.completion.is_ok());
        assert_eq!(run.values(), vec![1, 2, 3, 4]);
    }
}
