use crate::cpu::request::AccessKind;
use anyhow::{anyhow, bail, Context};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// One parsed trace record: `bubbles` non-memory instructions followed by one access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub bubbles: u64,
    pub addr: u64,
    pub kind: AccessKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// `<bubbles> <addr> [R|W]`, one access per line.
    Unfiltered,
    /// `<bubbles> <addr> [<write_addr>]`: a read, optionally followed by a zero-bubble write.
    Filtered,
}

pub trait TraceSource: BufRead + Seek {}

impl<T: BufRead + Seek> TraceSource for T {}

/// Lazily reads trace records from a seekable line source.
///
/// With replay enabled, reaching the end of the source rewinds to the first line so the stream
/// never runs dry; this is how an instruction budget larger than the trace is met.
pub struct TraceReader {
    name: String,
    source: Box<dyn TraceSource>,
    line_num: usize,
    replay: bool,
    pending_write: Option<u64>,
    line: String,
}

impl std::fmt::Debug for TraceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceReader")
            .field("name", &self.name)
            .field("line_num", &self.line_num)
            .field("replay", &self.replay)
            .field("pending_write", &self.pending_write)
            .finish()
    }
}

impl TraceReader {
    pub fn new(name: impl Into<String>, source: impl TraceSource + 'static) -> Self {
        Self {
            name: name.into(),
            source: Box::new(source),
            line_num: 0,
            replay: false,
            pending_write: None,
            line: String::new(),
        }
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("bad trace file: {}", path.display()))?;
        Ok(Self::new(path.display().to_string(), BufReader::new(file)))
    }

    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay = replay;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn next_entry(&mut self, mode: TraceMode) -> anyhow::Result<Option<TraceEntry>> {
        match mode {
            TraceMode::Unfiltered => self.next_unfiltered(),
            TraceMode::Filtered => self.next_filtered(),
        }
    }

    pub fn next_unfiltered(&mut self) -> anyhow::Result<Option<TraceEntry>> {
        if !self.read_line()? {
            return Ok(None);
        }
        self.parse(|fields| {
            let bubbles = parse_count(fields.next())?;
            let addr = parse_addr(fields.next())?;
            let kind = match fields.next() {
                None => AccessKind::Read,
                Some(tok) if tok.starts_with('R') => AccessKind::Read,
                Some(tok) if tok.starts_with('W') => AccessKind::Write,
                Some(tok) => bail!("unknown access type '{tok}'"),
            };
            Ok(TraceEntry { bubbles, addr, kind })
        })
        .map(Some)
    }

    pub fn next_filtered(&mut self) -> anyhow::Result<Option<TraceEntry>> {
        if let Some(addr) = self.pending_write.take() {
            return Ok(Some(TraceEntry {
                bubbles: 0,
                addr,
                kind: AccessKind::Write,
            }));
        }
        if !self.read_line()? {
            return Ok(None);
        }
        let (entry, write) = self.parse(|fields| {
            let bubbles = parse_count(fields.next())?;
            let addr = parse_addr(fields.next())?;
            let write = fields.next().map(|tok| parse_addr(Some(tok))).transpose()?;
            Ok((
                TraceEntry {
                    bubbles,
                    addr,
                    kind: AccessKind::Read,
                },
                write,
            ))
        })?;
        self.pending_write = write;
        Ok(Some(entry))
    }

    /// Load the next non-exhausted line into `self.line`. A blank line or end of file ends the
    /// stream, unless replay is on, in which case the source is rewound once.
    fn read_line(&mut self) -> anyhow::Result<bool> {
        if self.fill_line()? {
            return Ok(true);
        }
        if !self.replay {
            return Ok(false);
        }
        self.source
            .seek(SeekFrom::Start(0))
            .with_context(|| format!("cannot rewind trace {}", self.name))?;
        self.line_num = 0;
        self.fill_line()
    }

    fn fill_line(&mut self) -> anyhow::Result<bool> {
        self.line.clear();
        let n = self
            .source
            .read_line(&mut self.line)
            .with_context(|| format!("cannot read trace {}", self.name))?;
        self.line_num += 1;
        Ok(n > 0 && !self.line.trim().is_empty())
    }

    fn parse<T>(
        &self,
        f: impl FnOnce(&mut std::str::SplitWhitespace<'_>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        f(&mut self.line.split_whitespace())
            .with_context(|| {
                format!(
                    "{}:{}: malformed trace line {:?}",
                    self.name,
                    self.line_num,
                    self.line.trim_end()
                )
            })
    }
}

fn parse_count(tok: Option<&str>) -> anyhow::Result<u64> {
    let tok = tok.ok_or_else(|| anyhow!("missing bubble count"))?;
    tok.parse::<u64>()
        .with_context(|| format!("bad bubble count '{tok}'"))
}

/// Decimal, or hexadecimal with a `0x` prefix.
fn parse_addr(tok: Option<&str>) -> anyhow::Result<u64> {
    let tok = tok.ok_or_else(|| anyhow!("missing address"))?;
    let parsed = match tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => tok.parse::<u64>(),
    };
    parsed.with_context(|| format!("bad address '{tok}'"))
}
