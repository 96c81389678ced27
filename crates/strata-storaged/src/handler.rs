//! Request dispatch: one decoded request in, one response out.
//!
//! Runs on the blocking pool; every storage call here does synchronous file
//! I/O and may wait on storage locks.

use strata_config::{log_storage_debug, log_storage_error, log_storage_warn};
use strata_ipc::{StorageRequest, StorageResponse};
use strata_store::{status, Storage, StorageError};

pub fn handle_request(storage: &Storage, request: StorageRequest) -> StorageResponse {
    let kind = request.kind();
    let query_id = request.query_id();
    log_storage_debug!("Request received", kind = kind, query_id = query_id);

    match request {
        StorageRequest::Handshake { worker_id } => match storage.register_worker(worker_id) {
            Ok(registration) => match u32::try_from(registration.block_size) {
                Ok(block_size) => StorageResponse::HandshakeAck { block_size },
                Err(_) => {
                    log_storage_error!(
                        "Block size does not fit the handshake",
                        worker_id = worker_id,
                        block_size = registration.block_size
                    );
                    StorageResponse::Status {
                        status: status::IO_ERROR,
                    }
                }
            },
            Err(e) => failed(kind, query_id, e),
        },
        StorageRequest::CreateFile { query_id, name, tag } => {
            respond(kind, query_id, storage.create_file(query_id, &name, &tag))
        }
        StorageRequest::TruncateFile {
            query_id,
            name,
            tag,
            new_size_bytes,
        } => {
            let Ok(size) = u64::try_from(new_size_bytes) else {
                log_storage_warn!(
                    "Negative truncate size",
                    query_id = query_id,
                    size = new_size_bytes
                );
                return StorageResponse::Status {
                    status: status::INVALID_ARGUMENT,
                };
            };
            respond(kind, query_id, storage.truncate_file(query_id, &name, &tag, size))
        }
        StorageRequest::WriteBlock {
            query_id,
            name,
            tag,
            block,
            data,
        } => respond(
            kind,
            query_id,
            storage.write_block(query_id, &name, &tag, u64::from(block), &data),
        ),
        StorageRequest::ReadBlock {
            query_id,
            name,
            tag,
            block,
        } => match storage.read_block(query_id, &name, &tag, u64::from(block)) {
            Ok(data) => StorageResponse::BlockData {
                status: status::OK,
                data,
            },
            Err(e) => StorageResponse::BlockData {
                status: failed(kind, query_id, e).status(),
                data: Vec::new(),
            },
        },
        StorageRequest::TagFile {
            query_id,
            src_name,
            src_tag,
            dst_name,
            dst_tag,
        } => respond(
            kind,
            query_id,
            storage.tag_file(query_id, &src_name, &src_tag, &dst_name, &dst_tag),
        ),
        StorageRequest::TagCommit {
            query_id,
            name,
            tag,
        } => respond(kind, query_id, storage.commit_tag(query_id, &name, &tag)),
    }
}

fn respond<T>(kind: &str, query_id: u32, result: Result<T, StorageError>) -> StorageResponse {
    match result {
        Ok(_) => StorageResponse::Status { status: status::OK },
        Err(e) => failed(kind, query_id, e),
    }
}

fn failed(kind: &str, query_id: u32, error: StorageError) -> StorageResponse {
    let code = error.status();
    match &error {
        StorageError::Io { .. } | StorageError::Malformed { .. } => {
            log_storage_error!(
                "Request failed",
                kind = kind,
                query_id = query_id,
                status = code,
                error = error.to_string()
            );
        }
        _ => {
            log_storage_warn!(
                "Request rejected",
                kind = kind,
                query_id = query_id,
                status = code,
                error = error.to_string()
            );
        }
    }
    StorageResponse::Status { status: code }
}
