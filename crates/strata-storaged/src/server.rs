//! TCP accept loop and per-connection request pump.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use strata_config::{log_ipc_debug, log_storage_error, log_storage_info, log_storage_warn};
use strata_ipc::frame::{read_frame, write_frame};
use strata_ipc::{StorageRequest, StorageResponse};
use strata_store::Storage;
use tokio::net::{TcpListener, TcpStream};

use crate::handler::handle_request;

pub struct ServerState {
    pub storage: Storage,
    /// Pause applied before each non-handshake request
    pub operation_delay: Duration,
}

/// Accept connections until `shutdown` resolves. Each connection gets its own
/// task; in-flight operations are not cancelled by shutdown or disconnects.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let addr = listener.local_addr()?;
    log_storage_info!("Listening", addr = addr.to_string());
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        tokio::spawn(handle_connection(stream, peer, state));
                    }
                    Err(err) => {
                        log_storage_error!("Accept error", error = err.to_string());
                    }
                }
            }
            _ = &mut shutdown => {
                log_storage_info!("Shutdown signal received");
                break;
            }
        }
    }

    log_storage_info!(
        "Shutting down",
        workers = state.storage.connected_workers()
    );
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>) {
    let _ = stream.set_nodelay(true);
    log_storage_info!("Connection accepted", peer = peer.to_string());

    loop {
        let request: StorageRequest = match read_frame::<_, StorageRequest>(&mut stream).await {
            Ok(Some(request)) => {
                log_ipc_debug!("Frame received", peer = peer.to_string(), kind = request.kind());
                request
            }
            Ok(None) => {
                log_storage_info!("Connection closed", peer = peer.to_string());
                return;
            }
            Err(e) => {
                log_storage_warn!(
                    "Dropping connection after bad frame",
                    peer = peer.to_string(),
                    error = e.to_string()
                );
                return;
            }
        };

        if !state.operation_delay.is_zero()
            && !matches!(request, StorageRequest::Handshake { .. })
        {
            tokio::time::sleep(state.operation_delay).await;
        }

        let kind = request.kind();
        let worker = state.clone();
        let response: StorageResponse =
            match tokio::task::spawn_blocking(move || handle_request(&worker.storage, request))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    log_storage_error!("Request task failed", kind = kind, error = e.to_string());
                    return;
                }
            };

        log_ipc_debug!("Sending response", kind = kind, status = response.status());
        if let Err(e) = write_frame(&mut stream, &response).await {
            log_storage_warn!(
                "Could not send response",
                peer = peer.to_string(),
                kind = kind,
                error = e.to_string()
            );
            return;
        }
    }
}
