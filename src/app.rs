//! Service wiring: status writer, ingest loop and mix loop over one table

use std::sync::Arc;
use tokio::io::AsyncWrite;

use crate::config::AppConfig;
use crate::error::{Error, OutputError, Result};
use crate::network::{create_socket, StreamReceiver};
use crate::output::{FrameSink, MixLoop};
use crate::shutdown::Shutdown;
use crate::status::{NullNotifier, StatusFile, StatusNotifier, StatusPublisher};
use crate::streams::StreamTable;

/// Run the mixer until `shutdown` fires or a loop fails.
///
/// The status writer starts before the socket is bound, so any fatal
/// condition, including a failed bind, still leaves the status file marked
/// offline. A closed output sink counts as a normal stop.
pub async fn run<W>(config: &AppConfig, mut sink: FrameSink<W>, shutdown: Shutdown) -> Result<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let table = Arc::new(StreamTable::new(config.mixer.max_buffered_bytes()));

    // Status notifier
    let mut status_task = None;
    let notifier: Arc<dyn StatusNotifier> = if config.status.enabled {
        let (publisher, updates) = StatusPublisher::channel();
        let file = StatusFile::new(&config.status);
        status_task = Some(tokio::spawn(file.run(updates, shutdown.clone())));
        Arc::new(publisher)
    } else {
        Arc::new(NullNotifier)
    };

    let socket = match create_socket(&config.network) {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!("Could not open UDP socket: {}", e);
            shutdown.trigger();
            if let Some(task) = status_task {
                task.await?;
            }
            return Err(e.into());
        }
    };

    // Ingest loop
    let receiver = StreamReceiver::new(table.clone(), notifier.clone(), &config.mixer);
    let network_config = config.network.clone();
    let ingest_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { receiver.run(socket, &network_config, shutdown).await })
    };

    // Mix loop
    let mut mixer = MixLoop::new(table, notifier, &config.mixer);
    let mix_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { mixer.run(&mut sink, shutdown).await })
    };

    shutdown.wait().await;
    tracing::info!("Shutting down...");

    let ingest_result = ingest_task.await?;
    let mix_result = mix_task.await?;
    if let Some(task) = status_task {
        task.await?;
    }

    ingest_result?;
    match mix_result {
        Err(OutputError::Closed) => Ok(()),
        other => other.map_err(Error::from),
    }
}
