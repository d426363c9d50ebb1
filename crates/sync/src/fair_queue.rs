use lockstep_state::source::SourceId;

struct Entry {
    id: SourceId,
    fps: f64,
    count: u64,
    seq: u64,
}

/// Multiset of pending ticks. `pop` returns the source most overdue
/// relative to its own frame rate (highest `count / fps`); ties go to the
/// entry inserted first.
#[derive(Default)]
pub struct FairQueue {
    entries: Vec<Entry>,
    next_seq: u64,
}

impl FairQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: SourceId, fps: f64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.count += 1;
            return;
        }
        self.entries.push(Entry {
            id,
            fps: fps.max(f64::MIN_POSITIVE),
            count: 1,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    pub fn pop(&mut self) -> Option<SourceId> {
        let mut best: Option<usize> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            let better = match best {
                None => true,
                Some(b) => {
                    let current = &self.entries[b];
                    let lhs = entry.count as f64 / entry.fps;
                    let rhs = current.count as f64 / current.fps;
                    lhs > rhs || (lhs == rhs && entry.seq < current.seq)
                }
            };
            if better {
                best = Some(i);
            }
        }
        let i = best?;
        let id = self.entries[i].id;
        self.entries[i].count -= 1;
        if self.entries[i].count == 0 {
            self.entries.remove(i);
        }
        Some(id)
    }

    pub fn remove(&mut self, id: SourceId) {
        self.entries.retain(|e| e.id != id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.count as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
