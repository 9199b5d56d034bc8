use std::collections::{HashMap, HashSet};

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cpu::tlb::PAGE_BITS;

/// Maps trace (virtual) addresses to physical addresses. Called once per trace entry read.
pub trait PageAllocator {
    fn translate(&mut self, vaddr: u64, core_id: usize) -> u64;
}

/// Leaves addresses untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityPages;

impl PageAllocator for IdentityPages {
    fn translate(&mut self, vaddr: u64, _core_id: usize) -> u64 {
        vaddr
    }
}

/// Gives every (core, virtual page) pair its own physical frame, chosen uniformly among the
/// frames not yet handed out. Cores therefore never alias each other's pages until the frame
/// pool runs out, after which frames are reused.
#[derive(Debug)]
pub struct RandomPages {
    rng: StdRng,
    frames: u64,
    mapping: HashMap<(usize, u64), u64>,
    used: HashSet<u64>,
    warned_full: bool,
}

impl RandomPages {
    pub fn new(frames: u64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            frames: frames.max(1),
            mapping: HashMap::new(),
            used: HashSet::new(),
            warned_full: false,
        }
    }

    pub fn mapped_pages(&self) -> usize {
        self.mapping.len()
    }

    fn allocate(&mut self) -> u64 {
        if self.used.len() as u64 >= self.frames {
            if !self.warned_full {
                warn!("physical frame pool of {} frames exhausted, reusing frames", self.frames);
                self.warned_full = true;
            }
            return self.rng.gen_range(0..self.frames);
        }
        loop {
            let frame = self.rng.gen_range(0..self.frames);
            if self.used.insert(frame) {
                return frame;
            }
        }
    }
}

impl PageAllocator for RandomPages {
    fn translate(&mut self, vaddr: u64, core_id: usize) -> u64 {
        let vpn = vaddr >> PAGE_BITS;
        let offset = vaddr & ((1 << PAGE_BITS) - 1);
        let frame = match self.mapping.get(&(core_id, vpn)) {
            Some(&frame) => frame,
            None => {
                let frame = self.allocate();
                self.mapping.insert((core_id, vpn), frame);
                frame
            }
        };
        (frame << PAGE_BITS) | offset
    }
}
