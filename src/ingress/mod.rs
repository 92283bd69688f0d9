//! # Ingress Adapter
//!
//! Consumes raw emergency requests from a POSIX message queue, validates
//! them and hands [`EmergencyRequest`] values to the dispatcher.
//!
//! ## Wire format
//!
//! ASCII, four semicolon-separated fields:
//!
//! ```text
//! name;x;y;timestamp
//! ```
//!
//! A message is rejected (logged under `MESSAGE_QUEUE` and dropped) when any
//! field is empty, the name is 64 characters or longer, the coordinates fall
//! outside the grid, or the timestamp is non-positive or more than 60
//! seconds in the future.
//!
//! ## Queue handling
//!
//! The configured queue name gets a leading `/` when missing. The queue is
//! created if absent (maxmsg 32, msgsize 256, mode 0660) and opened
//! non-blocking; the consumer thread polls it, checking its stop flag
//! between attempts, and closes and unlinks the queue on shutdown. A bad
//! message never stops the consumer.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::warn;
use nix::errno::Errno;
use nix::mqueue::{mq_close, mq_open, mq_receive, mq_unlink, MqAttr, MqdT, MQ_OFlag};
use nix::sys::stat::Mode;
use thiserror::Error;

use crate::catalog::Grid;
use crate::config::EnvironmentConfig;
use crate::dispatch::{Dispatcher, EmergencyRequest};
use crate::eventlog::{Category, EventLog};
use crate::logutil::escape_log;
use crate::metrics;

/// Wire limits, fixed by the bus contract.
pub const MAX_MESSAGE_BYTES: usize = 256;
pub const MAX_QUEUED_MESSAGES: i64 = 32;
/// An emergency type name must fit 63 characters.
pub const MAX_NAME_LENGTH: usize = 64;
/// How far in the future a request timestamp may lie.
pub const TIMESTAMP_SKEW_SECONDS: i64 = 60;

/// Poll interval of the non-blocking receive loop; bounds shutdown latency.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("invalid request: {0}")]
    Malformed(String),
    #[error("queue name '{0}' cannot be used")]
    QueueName(String),
    #[error("message queue error: {0}")]
    Queue(#[from] nix::Error),
    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Queue names on the bus are absolute; prepend the `/` lazy senders omit.
pub fn normalize_queue_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    }
}

/// Validate one wire message against the grid and the clock (`now` in
/// wall-clock seconds).
pub fn parse_request(raw: &str, grid: Grid, now: i64) -> Result<EmergencyRequest, IngressError> {
    let fields: Vec<&str> = raw.split(';').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(IngressError::Malformed(format!(
            "expected 4 fields, got {}",
            fields.len()
        )));
    }
    if fields.iter().any(|f| f.is_empty()) {
        return Err(IngressError::Malformed("empty field".to_string()));
    }

    let name = fields[0];
    if name.len() >= MAX_NAME_LENGTH {
        return Err(IngressError::Malformed(format!(
            "name exceeds {} characters",
            MAX_NAME_LENGTH - 1
        )));
    }

    let x = fields[1]
        .parse()
        .map_err(|_| IngressError::Malformed(format!("invalid X coordinate '{}'", fields[1])))?;
    let y = fields[2]
        .parse()
        .map_err(|_| IngressError::Malformed(format!("invalid Y coordinate '{}'", fields[2])))?;
    if !grid.contains(x, y) {
        return Err(IngressError::Malformed(format!(
            "coordinates ({},{}) outside the {}x{} grid",
            x, y, grid.width, grid.height
        )));
    }

    let timestamp: i64 = fields[3]
        .parse()
        .map_err(|_| IngressError::Malformed(format!("invalid timestamp '{}'", fields[3])))?;
    if timestamp <= 0 || timestamp > now + TIMESTAMP_SKEW_SECONDS {
        return Err(IngressError::Malformed(format!(
            "timestamp {} not acceptable",
            timestamp
        )));
    }

    Ok(EmergencyRequest {
        type_name: name.to_string(),
        x,
        y,
        timestamp,
    })
}

/// Owns the consumer thread and the queue it reads.
pub struct MqConsumer {
    queue_name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MqConsumer {
    /// Open (creating if needed) the configured queue and start the consumer
    /// thread feeding `dispatcher`.
    pub fn start(
        environment: &EnvironmentConfig,
        dispatcher: Arc<Dispatcher>,
        events: Arc<EventLog>,
    ) -> Result<Self, IngressError> {
        let queue_name = normalize_queue_name(&environment.queue);
        let cname = CString::new(queue_name.clone())
            .map_err(|_| IngressError::QueueName(queue_name.clone()))?;

        let attr = MqAttr::new(0, MAX_QUEUED_MESSAGES, MAX_MESSAGE_BYTES as i64, 0);
        let oflag = MQ_OFlag::O_RDONLY | MQ_OFlag::O_CREAT | MQ_OFlag::O_NONBLOCK;
        let mode = Mode::from_bits_truncate(0o660);
        let mqd = match mq_open(cname.as_c_str(), oflag, mode, Some(&attr)) {
            Ok(mqd) => mqd,
            Err(err) => {
                events.event(
                    Category::MessageQueue,
                    "MQ-INIT-ERR",
                    format!("Failed to open queue '{}': {}", queue_name, err),
                );
                return Err(IngressError::Queue(err));
            }
        };
        events.event(
            Category::MessageQueue,
            "MQ-INIT",
            format!(
                "Message queue '{}' initialized (msg_size={} max_msg={})",
                queue_name, MAX_MESSAGE_BYTES, MAX_QUEUED_MESSAGES
            ),
        );

        let stop = Arc::new(AtomicBool::new(false));
        let grid = environment.grid;
        let handle = std::thread::Builder::new().name("mq-consumer".to_string()).spawn({
            let stop = Arc::clone(&stop);
            let queue_name = queue_name.clone();
            move || consumer_loop(mqd, cname, queue_name, grid, stop, dispatcher, events)
        })?;

        Ok(MqConsumer {
            queue_name,
            stop,
            handle: Some(handle),
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop the consumer and wait for it to close and unlink the queue.
    pub fn shutdown(mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MqConsumer {
    fn drop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn consumer_loop(
    mqd: MqdT,
    cname: CString,
    queue_name: String,
    grid: Grid,
    stop: Arc<AtomicBool>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<EventLog>,
) {
    events.event(
        Category::MessageQueue,
        "MQ-THREAD-START",
        format!("Consumer thread started for queue '{}'", queue_name),
    );

    let mut buffer = vec![0u8; MAX_MESSAGE_BYTES];
    while !stop.load(Ordering::Relaxed) {
        let mut priority = 0u32;
        match mq_receive(&mqd, &mut buffer, &mut priority) {
            Ok(received) => handle_message(&buffer[..received], grid, &dispatcher, &events),
            Err(Errno::EAGAIN) | Err(Errno::ETIMEDOUT) => std::thread::sleep(POLL_INTERVAL),
            Err(Errno::EINTR) => continue,
            Err(err) => {
                events.event(
                    Category::MessageQueue,
                    "MQ-RECEIVE-ERR",
                    format!("mq_receive failed: {}", err),
                );
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    if let Err(err) = mq_close(mqd) {
        warn!("failed to close queue '{}': {}", queue_name, err);
    }
    if let Err(err) = mq_unlink(cname.as_c_str()) {
        warn!("failed to unlink queue '{}': {}", queue_name, err);
    }
    events.event(
        Category::MessageQueue,
        "MQ-THREAD-STOP",
        format!("Consumer thread stopping for queue '{}'", queue_name),
    );
}

fn handle_message(payload: &[u8], grid: Grid, dispatcher: &Dispatcher, events: &EventLog) {
    metrics::inc_requests_received();

    let Ok(raw) = std::str::from_utf8(payload) else {
        events.event(
            Category::MessageQueue,
            "MQ-INVALID",
            "Received non-UTF8 message",
        );
        metrics::inc_requests_rejected();
        return;
    };
    let raw = raw.trim_matches('\0').trim();

    let now = chrono::Utc::now().timestamp();
    match parse_request(raw, grid, now) {
        Ok(request) => {
            events.event(
                Category::MessageQueue,
                "MQ-EMERGENCY",
                format!(
                    "Emergency '{}' received at ({},{}) timestamp={}",
                    request.type_name, request.x, request.y, request.timestamp
                ),
            );
            if let Err(err) = dispatcher.enqueue(&request) {
                events.event(
                    Category::EmergencyStatus,
                    "DSP-DISPATCH-FAIL",
                    format!("Failed to enqueue emergency '{}': {}", request.type_name, err),
                );
                metrics::inc_requests_rejected();
            }
        }
        Err(err) => {
            events.event(
                Category::MessageQueue,
                "MQ-INVALID",
                format!("Rejected message '{}': {}", escape_log(raw), err),
            );
            metrics::inc_requests_rejected();
        }
    }
}
