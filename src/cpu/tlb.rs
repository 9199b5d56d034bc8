use anyhow::ensure;

/// Page offset width; translations are tracked at 4 KiB granularity.
pub const PAGE_BITS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TranslationEntry {
    addr: u64,
    stamp: u64,
}

/// Set-associative translation table with approximate-LRU replacement.
///
/// The set index comes from address bits `[PAGE_BITS, PAGE_BITS + log2(entries))`, folded onto
/// the number of sets; the tag is everything above that field. Recency is tracked with a
/// per-table access counter rather than an ordered list, and eviction picks the smallest stamp.
#[derive(Debug)]
pub struct TranslationCache {
    ways: usize,
    sets: usize,
    entry_bits: u32,
    counter: u64,
    // flattened [set][way]
    table: Vec<Option<TranslationEntry>>,
}

impl TranslationCache {
    pub fn new(entries: usize, ways: usize) -> anyhow::Result<Self> {
        ensure!(ways > 0, "translation table needs at least one way");
        let entries = entries.max(ways);
        ensure!(
            entries.is_power_of_two(),
            "translation table size {entries} is not a power of two"
        );
        ensure!(
            entries % ways == 0,
            "translation table size {entries} is not a multiple of {ways} ways"
        );
        Ok(Self {
            ways,
            sets: entries / ways,
            entry_bits: entries.trailing_zeros(),
            counter: 0,
            table: vec![None; entries],
        })
    }

    pub fn entries(&self) -> usize {
        self.table.len()
    }

    pub fn ways(&self) -> usize {
        self.ways
    }

    pub fn sets(&self) -> usize {
        self.sets
    }

    fn index(&self, addr: u64) -> u64 {
        let mask = (1u64 << self.entry_bits) - 1;
        (addr >> PAGE_BITS) & mask
    }

    fn tag(&self, addr: u64) -> u64 {
        addr >> (PAGE_BITS + self.entry_bits)
    }

    fn set_range(&self, addr: u64) -> std::ops::Range<usize> {
        let set = (self.index(addr) % self.sets as u64) as usize;
        let start = set * self.ways;
        start..start + self.ways
    }

    /// Probe for `addr`. A hit restamps the entry; a miss leaves the table untouched.
    pub fn get(&mut self, addr: u64) -> bool {
        self.counter += 1;
        let tag = self.tag(addr);
        let range = self.set_range(addr);
        let stamp = self.counter;
        let entry_bits = self.entry_bits;
        match self.table[range]
            .iter_mut()
            .flatten()
            .find(|entry| entry.addr >> (PAGE_BITS + entry_bits) == tag)
        {
            Some(entry) => {
                entry.stamp = stamp;
                true
            }
            None => false,
        }
    }

    /// Install `addr`: refresh a matching entry, else fill the first empty way, else evict the
    /// way with the oldest stamp (lowest way index on ties).
    pub fn update(&mut self, addr: u64) {
        self.counter += 1;
        let tag = self.tag(addr);
        let range = self.set_range(addr);
        let stamp = self.counter;
        let shift = PAGE_BITS + self.entry_bits;
        let set = &mut self.table[range];

        let victim = set
            .iter()
            .position(|slot| slot.is_some_and(|e| e.addr >> shift == tag))
            .or_else(|| set.iter().position(Option::is_none))
            .unwrap_or_else(|| {
                set.iter()
                    .enumerate()
                    .min_by_key(|(way, slot)| (slot.map_or(0, |e| e.stamp), *way))
                    .map_or(0, |(way, _)| way)
            });
        set[victim] = Some(TranslationEntry { addr, stamp });
    }

    /// Whether `addr` is resident, without touching recency.
    pub fn contains(&self, addr: u64) -> bool {
        let tag = self.tag(addr);
        self.table[self.set_range(addr)]
            .iter()
            .flatten()
            .any(|entry| self.tag(entry.addr) == tag)
    }
}
