//! Disk-resident B+tree index.
//!
//! The tree is keyed by fixed-width multi-column composite keys and maps
//! each key to a single record id (unique index). One disk page holds one
//! node; nodes reference each other by page number and are always resolved
//! through the buffer pool. The leaf level forms a doubly linked list for
//! range iteration.
//!
//! Node page layout:
//! ```text
//! +----------------------+ 0
//! | Node Header (24)     |
//! +----------------------+ 24
//! | Keys                 |  order * key_len bytes
//! +----------------------+ 24 + order * key_len
//! | Rids                 |  order * 8 bytes
//! +----------------------+
//! ```
//!
//! The two arrays are parallel: entry i of the key array pairs with entry i
//! of the rid array. In leaves the rid locates a record; in internal nodes
//! its page_no field names the child covering `[key[i], key[i+1])`, with
//! key 0 duplicated as a sentinel lower bound for the leftmost child.

mod index;
mod node;
mod scan;

pub use index::BTreeIndex;
pub use node::{IndexSchema, Node, NodeHeader};
pub use scan::{Iid, IndexScan};
