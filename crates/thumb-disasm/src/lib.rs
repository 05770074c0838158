pub mod model;

// Re-export commonly used types/functions for consumers
pub use model::{load_raw_bin, Image, LabelKV, Section};

use thumb_rs::labels::LabelTable;

/// Builds a label table from imported pairs; later duplicates are dropped.
pub fn label_table(pairs: &[LabelKV]) -> LabelTable {
    let mut table = LabelTable::new();
    for kv in pairs {
        let _ = table.define(&kv.name, kv.addr, 0, 0);
    }
    table
}

/// Label pairs in address order.
pub fn label_pairs(table: &LabelTable) -> Vec<LabelKV> {
    table.iter().map(|l| LabelKV { addr: l.addr, name: l.name.clone() }).collect()
}
