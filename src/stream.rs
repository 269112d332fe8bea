//! Batch conversion API: submit many documents, receive results as they finish.
//!
//! Every request is started at once and then competes for the orchestrator's
//! slots, so no more than `max_concurrent_jobs` remote jobs are ever in
//! flight no matter how large the batch is. Results arrive in completion
//! order, tagged with the index of the request that produced them.

use crate::convert::{ConversionRequest, Orchestrator};
use crate::error::ConvertError;
use crate::output::ConversionOutput;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One finished job: the request's position in the batch and its result.
pub type JobResult = (usize, Result<ConversionOutput, ConvertError>);

/// A boxed stream of job results.
pub type JobStream = Pin<Box<dyn Stream<Item = JobResult> + Send>>;

/// Convert a batch of documents, yielding each result as its job finishes.
///
/// A failing job never stops the others. Requests are validated one at a
/// time in submission order, and each valid job joins the admission queue
/// before the next request is read, so slots are granted in submission
/// order.
///
/// # Example
/// ```rust,no_run
/// use konvrt::{convert_stream, ConversionConfig, ConversionRequest, DocumentFormat, Orchestrator};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Orchestrator::new(ConversionConfig::default())?;
/// let requests = vec![
///     ConversionRequest::from_path("a.pdf", DocumentFormat::Docx)?,
///     ConversionRequest::from_path("b.pdf", DocumentFormat::Docx)?,
/// ];
/// let mut results = convert_stream(&orchestrator, requests);
/// while let Some((idx, result)) = results.next().await {
///     match result {
///         Ok(out) => println!("#{idx}: {}", out.path.display()),
///         Err(e) => eprintln!("#{idx}: {e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn convert_stream(orchestrator: &Orchestrator, requests: Vec<ConversionRequest>) -> JobStream {
    convert_stream_with_cancel(orchestrator, requests, CancellationToken::new())
}

/// Like [`convert_stream`], but every job observes `cancel`.
///
/// Cancelling stops queued jobs from being admitted and running jobs at
/// their next status check; each yields [`ConvertError::Cancelled`].
pub fn convert_stream_with_cancel(
    orchestrator: &Orchestrator,
    requests: Vec<ConversionRequest>,
    cancel: CancellationToken,
) -> JobStream {
    info!(
        "Submitting {} conversions ({} slots)",
        requests.len(),
        orchestrator.limiter().capacity()
    );

    // The limiter is the real cap; polling every future lets all of them
    // reach the admission queue.
    let width = requests.len().max(1);
    let preparer = orchestrator.clone();
    let orchestrator = orchestrator.clone();

    let s = stream::iter(requests.into_iter().enumerate())
        .then(move |(idx, request)| {
            let preparer = preparer.clone();
            async move { (idx, preparer.prepare(&request).await) }
        })
        .map(move |(idx, prepared)| {
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            async move {
                let result = match prepared {
                    Ok(job) => orchestrator.run(job, &cancel).await,
                    Err(e) => Err(e),
                };
                (idx, result)
            }
        })
        .buffer_unordered(width);

    Box::pin(s)
}
