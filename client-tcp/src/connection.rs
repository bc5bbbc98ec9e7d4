use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sampler::{ConnectionStats, OpKind, Operation};
use shared::config::Config;
use shared::{Error, Result};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::generator::Generator;
use crate::keygen::KeyGenerator;
use crate::protocol::{self, GetLine, Request, TextCodec, END};
use crate::values::ValuePool;

/// SETs kept in flight during the load phase.
pub const LOADER_CHUNK: u64 = 1024;

/// Upper bound on a single generated inter-arrival delay.
const MAX_DELAY: Duration = Duration::from_secs(3600);

/// How incoming bytes are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadState {
    /// Not connected yet; any input is an error
    InitRead,
    /// Nothing outstanding
    Idle,
    WaitingForGet,
    /// Value header seen, `length` payload bytes plus CRLF still to come
    WaitingForGetData { length: usize },
    WaitingForEnd,
    WaitingForSet,
    /// Bulk population in progress
    Loading,
}

/// When the next command may be sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteState {
    InitWrite,
    WaitingForTime,
    Issuing,
    /// Pipeline is full
    WaitingForOpq,
}

/// One client session against one server, with no I/O of its own.
///
/// The transport appends received bytes to [`input_mut`](Self::input_mut) and calls
/// [`read_callback`](Self::read_callback), fires [`timer_callback`](Self::timer_callback) when
/// [`timer_deadline`](Self::timer_deadline) passes, and writes out whatever
/// [`take_output`](Self::take_output) returns.
pub struct Connection {
    id: usize,
    addr: String,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,

    read_state: ReadState,
    write_state: WriteState,
    op_queue: VecDeque<Operation>,

    input: BytesMut,
    output: BytesMut,
    codec: TextCodec,

    start_time: Instant,
    next_time: Instant,
    timer: Option<Instant>,

    loader_issued: u64,
    loader_completed: u64,

    stats: ConnectionStats,

    iagen: Generator,
    valuesize: Generator,
    keygen: KeyGenerator,
    values: ValuePool,
    rng: StdRng,
}

impl Connection {
    pub fn new(
        id: usize,
        addr: impl Into<String>,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        values: ValuePool,
    ) -> Result<Self> {
        let lambda = config.lambda();
        let iagen = if lambda <= 0.0 {
            Generator::Fixed(0.0)
        } else {
            let mut iagen: Generator = config.iadist.parse()?;
            iagen.set_lambda(lambda);
            iagen
        };
        let keygen = KeyGenerator::new(config.keysize.parse()?, config.records);
        let valuesize: Generator = config.valuesize.parse()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_os_rng(),
        };
        let now = clock.now();

        Ok(Self {
            id,
            addr: addr.into(),
            stats: ConnectionStats::new(config.save.is_some()),
            config,
            clock,
            read_state: ReadState::InitRead,
            write_state: WriteState::InitWrite,
            op_queue: VecDeque::new(),
            input: BytesMut::new(),
            output: BytesMut::new(),
            codec: TextCodec::new(),
            start_time: now,
            next_time: now,
            timer: None,
            loader_issued: 0,
            loader_completed: 0,
            iagen,
            valuesize,
            keygen,
            values,
            rng,
        })
    }

    /// The transport finished connecting.
    pub fn on_connected(&mut self) {
        debug!(conn = self.id, addr = %self.addr, "connected");
        self.read_state = ReadState::Idle;
    }

    /// Prepares the connection for the next phase. Every issued operation must have completed.
    pub fn reset(&mut self) -> Result<()> {
        if !self.op_queue.is_empty() {
            return Err(Error::QueueNotEmpty(self.op_queue.len()));
        }
        self.timer = None;
        self.read_state = ReadState::Idle;
        self.write_state = WriteState::InitWrite;
        self.stats = self.stats.cleared();
        Ok(())
    }

    /// Marks the beginning of the measured run.
    pub fn start(&mut self, now: Instant) {
        self.start_time = now;
        self.stats.start = Some(now);
    }

    /// Marks the end of the measured run.
    pub fn finish(&mut self, now: Instant) {
        self.stats.stop = Some(now);
    }

    pub fn issue_get(&mut self, key: String) -> Result<()> {
        let op = Operation::new(OpKind::Get, key, self.clock.now());
        let request = Request::Get {
            key: op.key.clone(),
        };
        self.op_queue.push_back(op);

        if self.read_state == ReadState::Idle {
            self.read_state = ReadState::WaitingForGet;
        }

        self.send(request)
    }

    pub fn issue_set(&mut self, key: String, length: usize) -> Result<()> {
        let op = Operation::new(OpKind::Set, key, self.clock.now());
        let request = Request::Set {
            key: op.key.clone(),
            value: self.values.value(&mut self.rng, length),
        };
        self.op_queue.push_back(op);

        if self.read_state == ReadState::Idle {
            self.read_state = ReadState::WaitingForSet;
        }

        self.send(request)
    }

    fn send(&mut self, request: Request) -> Result<()> {
        let before = self.output.len();
        self.codec.encode(request, &mut self.output)?;
        if self.read_state != ReadState::Loading {
            self.stats.tx_bytes += (self.output.len() - before) as u64;
        }
        Ok(())
    }

    fn issue_something(&mut self) -> Result<()> {
        let index = self.rng.random_range(0..self.config.records);
        let key = self.keygen.generate(index);

        if self.rng.random::<f64>() < self.config.update {
            let length = self.value_length();
            self.issue_set(key, length)
        } else {
            self.issue_get(key)
        }
    }

    fn value_length(&mut self) -> usize {
        let drawn = self.valuesize.generate(&mut self.rng).round();
        if drawn.is_nan() || drawn < 0.0 {
            0
        } else {
            drawn as usize
        }
    }

    fn next_delay(&mut self) -> Duration {
        let secs = self.iagen.generate(&mut self.rng);
        if secs.is_nan() || secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(secs.min(MAX_DELAY.as_secs_f64()))
        }
    }

    /// Removes the head of the queue and points the read machine at the next expected reply.
    fn pop_op(&mut self) -> Result<Operation> {
        let op = self
            .op_queue
            .pop_front()
            .ok_or_else(|| Error::Protocol("reply with no operation in flight".to_string()))?;

        if self.read_state == ReadState::Loading {
            return Ok(op);
        }

        self.read_state = match self.op_queue.front().map(|next| next.kind) {
            Some(OpKind::Get) => ReadState::WaitingForGet,
            Some(OpKind::Set) => ReadState::WaitingForSet,
            None => ReadState::Idle,
        };

        Ok(op)
    }

    /// Records the head operation as done and gives the write machine a chance to refill the
    /// pipeline.
    fn complete_head(&mut self) -> Result<()> {
        let now = self.clock.now();
        let mut op = self.pop_op()?;
        op.complete(now);

        match op.kind {
            OpKind::Get => self.stats.log_get(&op)?,
            OpKind::Set => self.stats.log_set(&op)?,
        }

        self.drive_write_machine(now)
    }

    pub fn check_exit_condition(&self, now: Instant) -> bool {
        if self.read_state == ReadState::InitRead {
            return false;
        }
        if now > self.run_deadline() {
            return true;
        }
        self.config.loadonly && self.read_state == ReadState::Idle
    }

    /// Issues as many commands as the arrival schedule and pipeline depth allow at `now`.
    pub fn drive_write_machine(&mut self, now: Instant) -> Result<()> {
        if self.check_exit_condition(now) {
            return Ok(());
        }

        loop {
            match self.write_state {
                WriteState::InitWrite => {
                    let delay = self.next_delay();
                    self.next_time = now + delay;
                    self.timer = Some(self.next_time);
                    self.write_state = WriteState::WaitingForTime;
                }
                WriteState::Issuing => {
                    if self.op_queue.len() >= self.config.depth {
                        self.write_state = WriteState::WaitingForOpq;
                        return Ok(());
                    }
                    if now < self.next_time {
                        // go around once more so the timer gets armed
                        self.write_state = WriteState::WaitingForTime;
                        continue;
                    }

                    self.issue_something()?;
                    self.stats.log_op(self.op_queue.len())?;
                    let delay = self.next_delay();
                    self.next_time += delay;
                }
                WriteState::WaitingForTime => {
                    if now < self.next_time {
                        if self.timer.is_none() {
                            self.timer = Some(self.next_time);
                        }
                        return Ok(());
                    }
                    self.write_state = WriteState::Issuing;
                }
                WriteState::WaitingForOpq => {
                    if self.op_queue.len() >= self.config.depth {
                        return Ok(());
                    }
                    self.write_state = WriteState::Issuing;
                }
            }
        }
    }

    /// Consumes every complete reply in the input buffer.
    pub fn read_callback(&mut self) -> Result<()> {
        if self.op_queue.is_empty() {
            warn!(conn = self.id, addr = %self.addr, "spurious read callback");
        }

        loop {
            match self.read_state {
                ReadState::InitRead => return Err(Error::NotConnected),
                ReadState::Idle => return Ok(()),

                ReadState::WaitingForGet => {
                    let Some((line, consumed)) = self.next_line()? else {
                        return Ok(());
                    };
                    self.stats.rx_bytes += consumed as u64;

                    match GetLine::parse(&line).map_err(Error::Protocol)? {
                        GetLine::End => {
                            self.stats.get_misses += 1;
                            self.complete_head()?;
                        }
                        GetLine::Value { length } => {
                            self.read_state = ReadState::WaitingForGetData { length };
                        }
                    }
                }

                ReadState::WaitingForGetData { length } => {
                    // payload contents are not inspected; the line decoder has no partial scan
                    // pending because the header was just decoded
                    if !protocol::drain(&mut self.input, length + 2) {
                        return Ok(());
                    }
                    self.stats.rx_bytes += (length + 2) as u64;
                    self.read_state = ReadState::WaitingForEnd;
                }

                ReadState::WaitingForEnd => {
                    let Some((line, consumed)) = self.next_line()? else {
                        return Ok(());
                    };
                    self.stats.rx_bytes += consumed as u64;

                    if line != END {
                        return Err(Error::Protocol(format!(
                            "expected END after value from {}, got {line:?}",
                            self.addr
                        )));
                    }
                    self.complete_head()?;
                }

                ReadState::WaitingForSet => {
                    // the acknowledgment text is not checked: NOT_STORED counts as done
                    let Some((_, consumed)) = self.next_line()? else {
                        return Ok(());
                    };
                    self.stats.rx_bytes += consumed as u64;
                    self.complete_head()?;
                }

                ReadState::Loading => {
                    if self.next_line()?.is_none() {
                        return Ok(());
                    }

                    self.loader_completed += 1;
                    self.pop_op()?;

                    if self.loader_completed >= self.config.records {
                        debug!(conn = self.id, addr = %self.addr, "finished loading");
                        self.read_state = ReadState::Idle;
                    } else {
                        self.issue_loader_chunk()?;
                    }
                }
            }
        }
    }

    /// Takes one reply line off the input, with the number of bytes it occupied.
    fn next_line(&mut self) -> Result<Option<(String, usize)>> {
        let before = self.input.len();
        let line = self.codec.decode(&mut self.input).map_err(|e| {
            Error::Protocol(format!("bad reply line from {}: {e}", self.addr))
        })?;
        Ok(line.map(|line| (line, before - self.input.len())))
    }

    /// Appends `data` to the input buffer and processes it.
    pub fn receive(&mut self, data: &[u8]) -> Result<()> {
        self.input.extend_from_slice(data);
        self.read_callback()
    }

    pub fn timer_callback(&mut self) -> Result<()> {
        self.timer = None;
        let now = self.clock.now();
        self.drive_write_machine(now)
    }

    /// Starts populating records `0..records` with sequential SETs.
    pub fn start_loading(&mut self) -> Result<()> {
        debug!(conn = self.id, addr = %self.addr, records = self.config.records, "loading");
        self.read_state = ReadState::Loading;
        self.loader_issued = 0;
        self.loader_completed = 0;
        self.issue_loader_chunk()
    }

    fn issue_loader_chunk(&mut self) -> Result<()> {
        while self.loader_issued < self.loader_completed + LOADER_CHUNK
            && self.loader_issued < self.config.records
        {
            let key = self.keygen.generate(self.loader_issued);
            let length = self.value_length();
            self.issue_set(key, length)?;
            self.loader_issued += 1;
        }
        Ok(())
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    pub fn write_state(&self) -> WriteState {
        self.write_state
    }

    pub fn queue_len(&self) -> usize {
        self.op_queue.len()
    }

    /// The operation whose reply is expected next.
    pub fn front(&self) -> Option<&Operation> {
        self.op_queue.front()
    }

    pub fn loader_issued(&self) -> u64 {
        self.loader_issued
    }

    pub fn loader_completed(&self) -> u64 {
        self.loader_completed
    }

    pub fn is_loaded(&self) -> bool {
        self.read_state == ReadState::Idle && self.loader_completed >= self.config.records
    }

    /// When the armed timer should fire, if one is armed.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer
    }

    /// End of the measured run.
    pub fn run_deadline(&self) -> Instant {
        self.start_time + self.config.time
    }

    pub fn input_mut(&mut self) -> &mut BytesMut {
        &mut self.input
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Everything encoded since the last call.
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn into_stats(self) -> ConnectionStats {
        self.stats
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("read_state", &self.read_state)
            .field("write_state", &self.write_state)
            .field("queued", &self.op_queue.len())
            .finish()
    }
}
