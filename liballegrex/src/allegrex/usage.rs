use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionCount {
    pub name: &'static str,
    pub count: u64,
}

/// Per-mnemonic occurrence counts accumulated across translations.
#[derive(Debug, Default, Clone)]
pub struct InstructionUsage {
    counts: HashMap<&'static str, u64>,
}

impl InstructionUsage {
    pub fn new() -> Self {
        InstructionUsage::default()
    }

    pub fn record(&mut self, name: &'static str) {
        *self.counts.entry(name).or_insert(0) += 1;
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Counts sorted by occurrence, most frequent first.
    pub fn snapshot(&self) -> Vec<InstructionCount> {
        let mut items: Vec<InstructionCount> = self
            .counts
            .iter()
            .map(|(&name, &count)| InstructionCount { name, count })
            .collect();
        items.sort_by(|a, b| b.count.cmp(&a.count));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_sorted_descending() {
        let mut usage = InstructionUsage::new();
        for name in ["beq", "addu", "lw", "addu", "lw", "addu"] {
            usage.record(name);
        }

        let snapshot = usage.snapshot();
        let names: Vec<_> = snapshot.iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["addu", "lw", "beq"]);
        assert_eq!(snapshot[0].count, 3);
        assert_eq!(usage.total(), 6);
        assert_eq!(usage.count("sw"), 0);
    }
}
