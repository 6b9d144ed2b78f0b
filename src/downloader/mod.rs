//! Bounded-concurrency, coalescing download engine.

pub mod operation;
pub mod options;
pub mod token;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, Semaphore};

use crate::decode::Decoder;
use crate::error::Error;
use crate::http::{HttpClient, HttpRequest};
use crate::metrics::{histogram, HistTag};

use operation::{DownloadUpdate, Finished, Operation};
pub use options::{DownloaderOptions, ExecutionOrder, Priority};
pub use token::DownloadToken;

/// A bounded-concurrency fetch engine. Concurrent subscriptions to the same
/// URL (with compatible options) are coalesced onto a single underlying
/// [`Operation`]: exactly one HTTP request is issued and every subscriber
/// observes the same sequence of progress/completion events.
pub struct Downloader {
    operations: Arc<DashMap<String, Arc<Operation>>>,
    queue_tx: mpsc::UnboundedSender<Arc<Operation>>,
    order: ExecutionOrder,
}

impl Downloader {
    pub fn new(http: Arc<dyn HttpClient>, decoder: Arc<dyn Decoder>, max_concurrent: usize) -> Self {
        Self::with_order(http, decoder, max_concurrent, ExecutionOrder::default())
    }

    pub fn with_order(
        http: Arc<dyn HttpClient>,
        decoder: Arc<dyn Decoder>,
        max_concurrent: usize,
        order: ExecutionOrder,
    ) -> Self {
        let operations: Arc<DashMap<String, Arc<Operation>>> = Arc::new(DashMap::new());
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        tokio::spawn(dispatch_loop(
            queue_rx,
            semaphore,
            order,
            http,
            decoder,
            Arc::clone(&operations),
        ));

        Self {
            operations,
            queue_tx,
            order,
        }
    }

    /// Subscribes to a download of `url`. Coalesces with any in-flight
    /// operation for the same URL.
    pub fn subscribe(
        &self,
        url: impl Into<String>,
        options: DownloaderOptions,
    ) -> (DownloadToken, mpsc::UnboundedReceiver<DownloadUpdate>) {
        let url = url.into();
        loop {
            if let Some(entry) = self.operations.get(&url) {
                let op = Arc::clone(&entry);
                drop(entry);
                if !op.state().is_terminal() {
                    return op.subscribe();
                }
                self.operations.remove_if(&url, |_, existing| Arc::ptr_eq(existing, &op));
                continue;
            }

            let op = Operation::new(url.clone(), options.clone());
            match self.operations.entry(url.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&op));
                    let _ = self.queue_tx.send(Arc::clone(&op));
                    tracing::debug!(url = %op.url(), "download queued");
                    return op.subscribe();
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    pub fn execution_order(&self) -> ExecutionOrder {
        self.order
    }

    pub fn in_flight_count(&self) -> usize {
        self.operations.len()
    }
}

struct PriorityQueues {
    high: VecDeque<Arc<Operation>>,
    low: VecDeque<Arc<Operation>>,
    order: ExecutionOrder,
}

impl PriorityQueues {
    fn new(order: ExecutionOrder) -> Self {
        Self {
            high: VecDeque::new(),
            low: VecDeque::new(),
            order,
        }
    }

    fn push(&mut self, op: Arc<Operation>) {
        match op.options().priority {
            crate::downloader::options::Priority::High => self.high.push_back(op),
            _ => self.low.push_back(op),
        }
    }

    fn pop(&mut self) -> Option<Arc<Operation>> {
        let queue = if !self.high.is_empty() {
            &mut self.high
        } else {
            &mut self.low
        };
        match self.order {
            ExecutionOrder::Fifo => queue.pop_front(),
            ExecutionOrder::Lifo => queue.pop_back(),
        }
    }
}

async fn dispatch_loop(
    mut queue_rx: mpsc::UnboundedReceiver<Arc<Operation>>,
    semaphore: Arc<Semaphore>,
    order: ExecutionOrder,
    http: Arc<dyn HttpClient>,
    decoder: Arc<dyn Decoder>,
    operations: Arc<DashMap<String, Arc<Operation>>>,
) {
    let mut pending = PriorityQueues::new(order);

    loop {
        while let Ok(op) = queue_rx.try_recv() {
            pending.push(op);
        }

        let Some(op) = pending.pop() else {
            match queue_rx.recv().await {
                Some(op) => {
                    pending.push(op);
                    continue;
                }
                None => break,
            }
        };

        if op.state().is_terminal() {
            // Every subscriber cancelled before dispatch even started.
            continue;
        }

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let http = Arc::clone(&http);
        let decoder = Arc::clone(&decoder);
        let operations = Arc::clone(&operations);
        let op_for_task = Arc::clone(&op);

        let task = tokio::spawn(async move {
            let _permit = permit;
            run_operation(Arc::clone(&op_for_task), http, decoder).await;
            operations.remove_if(op_for_task.url(), |_, existing| {
                Arc::ptr_eq(existing, &op_for_task)
            });
        });
        op.attach_task(task);
    }
}

async fn run_operation(op: Arc<Operation>, http: Arc<dyn HttpClient>, decoder: Arc<dyn Decoder>) {
    if !op.mark_started() {
        return;
    }

    tracing::debug!(url = %op.url(), "download starting");
    let start = Instant::now();

    let mut request = HttpRequest::new(op.url());
    request.allow_invalid_certs = op.options().allow_invalid_ssl_certificates;
    request.handle_cookies = op.options().handle_cookies;
    request.headers = op.options().headers.clone();

    let response = match http.fetch(request).await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(url = %op.url(), error = %err, "download failed");
            op.finish(Err(err));
            return;
        }
    };

    tracing::debug!(url = %op.url(), status = response.status, "download receiving response");
    op.set_receiving();

    let response_headers = response.headers.clone();
    let mut buf: Vec<u8> = Vec::with_capacity(response.content_length.unwrap_or(0) as usize);
    let mut body = response.body;
    let progressive = op.options().progressive;

    loop {
        use futures_util::StreamExt;
        match body.next().await {
            Some(Ok(chunk)) => {
                buf.extend_from_slice(&chunk);
                op.emit_progress(buf.len() as u64, response.content_length);

                if progressive {
                    if let Some(partial) = decoder.decode_progressive(&buf, response.content_length) {
                        op.emit_partial(partial);
                    }
                }
            }
            Some(Err(err)) => {
                op.finish(Err(err));
                return;
            }
            None => break,
        }
    }

    let scale_down = op.options().scale_down_large_images && !progressive;
    match decoder.decode(&buf, scale_down) {
        Ok(image) => {
            histogram!(HistTag::DownloadDuration).record(start.elapsed());
            tracing::debug!(url = %op.url(), bytes = buf.len(), "download finished");
            op.finish(Ok(Finished {
                image,
                bytes: buf.into(),
                headers: response_headers,
            }));
        }
        Err(err) => op.finish(Err(Error::Decode(err))),
    }
}
