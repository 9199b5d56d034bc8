use anyhow::{bail, ensure};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct WindowEntry {
    ready: bool,
    /// `None` for bubbles, which never match a wakeup.
    addr: Option<u64>,
}

/// Fixed-capacity circular instruction window. Entries are inserted at `head` and retire from
/// `tail` strictly in program order, at most `width` per call to [`ReorderWindow::retire`].
#[derive(Debug)]
pub struct ReorderWindow {
    entries: Vec<WindowEntry>,
    width: usize,
    load: usize,
    head: usize,
    tail: usize,
}

impl ReorderWindow {
    pub fn new(depth: usize, width: usize) -> anyhow::Result<Self> {
        ensure!(depth > 0, "window depth must be non-zero");
        ensure!(width > 0, "window width must be non-zero");
        Ok(Self {
            entries: vec![WindowEntry::default(); depth],
            width,
            load: 0,
            head: 0,
            tail: 0,
        })
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn load(&self) -> usize {
        self.load
    }

    pub fn is_full(&self) -> bool {
        self.load == self.depth()
    }

    pub fn is_empty(&self) -> bool {
        self.load == 0
    }

    /// Callers must check [`ReorderWindow::is_full`] first; inserting into a full window is an
    /// error.
    pub fn insert(&mut self, ready: bool, addr: Option<u64>) -> anyhow::Result<()> {
        if self.is_full() {
            bail!("insert into full window (depth {})", self.depth());
        }
        self.entries[self.head] = WindowEntry { ready, addr };
        self.head = (self.head + 1) % self.depth();
        self.load += 1;
        Ok(())
    }

    /// Mark ready every live entry whose address matches `addr` under `mask`. With a cache-line
    /// mask this wakes all entries waiting on the same line.
    pub fn set_ready(&mut self, addr: u64, mask: u64) {
        let depth = self.depth();
        for i in 0..self.load {
            let entry = &mut self.entries[(self.tail + i) % depth];
            if entry.addr.is_some_and(|a| a & mask == addr & mask) {
                entry.ready = true;
            }
        }
    }

    /// Retire ready entries from the tail, stopping at the first one still waiting.
    pub fn retire(&mut self) -> usize {
        let mut retired = 0;
        while self.load > 0 && retired < self.width {
            if !self.entries[self.tail].ready {
                break;
            }
            self.tail = (self.tail + 1) % self.depth();
            self.load -= 1;
            retired += 1;
        }
        retired
    }
}
