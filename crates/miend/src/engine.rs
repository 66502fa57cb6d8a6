use image::DynamicImage;
use mien_core::{identify, ExtractorError, Identification, ReferenceSet};
use mien_extract::OnnxExtractor;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Identify {
        image: DynamicImage,
        references: Arc<ReferenceSet>,
        threshold: f32,
        reply: oneshot::Sender<Result<Identification, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run extraction + matching for one query image.
    ///
    /// The reference set travels with each request; replacing the shared
    /// `Arc` with a freshly built set is all a future rebuild needs, and
    /// in-flight requests keep the set they started with.
    pub async fn identify(
        &self,
        image: DynamicImage,
        references: Arc<ReferenceSet>,
        threshold: f32,
    ) -> Result<Identification, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify {
                image,
                references,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the identification engine on a dedicated OS thread.
///
/// The ONNX sessions are owned by this thread for the process lifetime;
/// the async side only ever talks to it over the channel, so extraction
/// never blocks the runtime.
pub fn spawn_engine(mut extractor: OnnxExtractor) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("mien-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                match request {
                    EngineRequest::Identify {
                        image,
                        references,
                        threshold,
                        reply,
                    } => {
                        let result = identify(&mut extractor, &image, &references, threshold)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}
