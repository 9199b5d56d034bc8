/*
Time-queue used by the reference collaborator models.

Each timed resource (DRAM channel, cache hit pipeline) is wrapped by a TimedServer, which enforces
a service law:
    - a fixed latency added to every request, plus
    - an occupancy component expressed in bytes-per-cycle, which limits how often a new request
      may start service.

Service is pipelined: a request occupies the server only for its occupancy cycles, so several
requests may be in flight at once, bounded by the queue capacity.  When the server cannot accept
more work it returns a Backpressure carrying the request back, and the caller retries next cycle.
*/

use std::collections::VecDeque;

pub type Cycle = u64;

/// Timing of one accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
}

impl Ticket {
    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }
}

#[derive(Debug)]
pub struct ServiceRequest<T> {
    pub payload: T,
    pub size_bytes: u32,
}

impl<T> ServiceRequest<T> {
    pub fn new(payload: T, size_bytes: u32) -> Self {
        Self { payload, size_bytes }
    }
}

#[derive(Debug)]
pub struct ServiceResult<T> {
    pub payload: T,
    pub ticket: Ticket,
}

/// Refusal from [`TimedServer::try_enqueue`]; the request is handed back untouched.
#[derive(Debug)]
pub enum Backpressure<T> {
    QueueFull { request: ServiceRequest<T>, capacity: usize },
    Busy { request: ServiceRequest<T>, available_at: Cycle },
}

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub base_latency: Cycle,
    /// A request of N bytes keeps new requests out for ceil(N / bytes_per_cycle) cycles.
    pub bytes_per_cycle: u32,
    /// Requests accepted but not yet drained.
    pub queue_capacity: usize,
}

#[derive(Debug)]
struct InService<T> {
    payload: T,
    ticket: Ticket,
}

#[derive(Debug)]
pub struct TimedServer<T> {
    config: ServerConfig,
    in_service: VecDeque<InService<T>>,
    busy_until: Cycle,
}

impl<T> TimedServer<T> {
    pub fn new(config: ServerConfig) -> Self {
        assert!(config.bytes_per_cycle > 0, "bytes_per_cycle must be > 0");
        assert!(config.queue_capacity > 0, "queue_capacity must be > 0");
        Self {
            config,
            in_service: VecDeque::with_capacity(config.queue_capacity),
            busy_until: 0,
        }
    }

    pub fn try_enqueue(
        &mut self,
        now: Cycle,
        request: ServiceRequest<T>,
    ) -> Result<Ticket, Backpressure<T>> {
        let capacity = self.config.queue_capacity;
        if self.in_service.len() >= capacity {
            return Err(Backpressure::QueueFull { request, capacity });
        }
        if self.busy_until > now {
            let available_at = self.busy_until;
            return Err(Backpressure::Busy { request, available_at });
        }

        let occupancy = (request.size_bytes as u64).div_ceil(self.config.bytes_per_cycle as u64);
        self.busy_until = now.saturating_add(occupancy);
        let ticket = Ticket {
            issued_at: now,
            ready_at: self.busy_until.saturating_add(self.config.base_latency),
        };
        // fixed latency keeps the queue sorted by ready_at
        self.in_service.push_back(InService {
            payload: request.payload,
            ticket,
        });
        Ok(ticket)
    }

    /// Hand every request whose ticket is ready by `now` to `callback`, oldest first.
    pub fn service_ready(&mut self, now: Cycle, mut callback: impl FnMut(ServiceResult<T>)) {
        while let Some(done) = self.in_service.pop_front() {
            if !done.ticket.is_ready(now) {
                self.in_service.push_front(done);
                break;
            }
            callback(ServiceResult {
                payload: done.payload,
                ticket: done.ticket,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.in_service.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_service.is_empty()
    }

    pub fn clear(&mut self) {
        self.in_service.clear();
        self.busy_until = 0;
    }
}
