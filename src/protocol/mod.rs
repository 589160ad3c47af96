//! Wire protocol types (`spec.md` §6). The gossip transport itself is
//! out of scope (`spec.md` §1); this only defines the message shapes a
//! transport carries.

pub mod messages;
