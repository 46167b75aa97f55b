//! Newline-delimited JSON front end for [`FeedService`].
//!
//! Every request line runs on its own task, so a refresh that is waiting on
//! its hidden page never holds up reads, marks or a superseding refresh.
//! Replies can therefore arrive out of order; a request's optional `id`
//! field is echoed on its reply so callers can pair them.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::messages::{Request, Response};
use crate::service::FeedService;

/// Serves requests from `reader` until it is exhausted, then waits for the
/// requests still in flight and returns once their replies are written.
pub async fn serve_lines<R, W>(
    service: Arc<FeedService>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (replies, mut outgoing) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = outgoing.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let service = service.clone();
        let replies = replies.clone();
        tokio::spawn(async move {
            let reply = answer(&service, &line).await;
            if replies.send(reply).is_err() {
                debug!("reply writer gone, dropping reply");
            }
        });
    }
    info!("request stream closed, draining in-flight requests");
    drop(replies);

    match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}

async fn answer(service: &FeedService, line: &str) -> String {
    let (id, response) = match serde_json::from_str::<Value>(line) {
        Ok(mut value) => {
            let id = value.as_object_mut().and_then(|object| object.remove("id"));
            let response = match serde_json::from_value::<Request>(value) {
                Ok(request) => service.handle(request).await,
                Err(e) => {
                    warn!(error = %e, "rejecting malformed request");
                    Response::failure(format!("malformed request: {e}"))
                }
            };
            (id, response)
        }
        Err(e) => {
            warn!(error = %e, "rejecting request that is not JSON");
            (None, Response::failure(format!("malformed request: {e}")))
        }
    };
    encode(id, &response)
}

fn encode(id: Option<Value>, response: &Response) -> String {
    let mut value = serde_json::to_value(response)
        .unwrap_or_else(|e| json!({ "success": false, "error": e.to_string() }));
    if let (Some(id), Some(object)) = (id, value.as_object_mut()) {
        object.insert("id".to_string(), id);
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_carries_the_request_id() {
        let line = encode(Some(json!(7)), &Response::ok());
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({ "success": true, "id": 7 }));
    }

    #[test]
    fn reply_without_id_is_left_bare() {
        let line = encode(None, &Response::failure("nope"));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({ "success": false, "error": "nope" }));
    }
}
