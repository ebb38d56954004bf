pub mod engine;
pub mod locks;
pub mod memory;
pub mod notifications;
pub mod read_model;
pub mod store;
pub mod supabase;

pub use engine::*;
pub use locks::*;
pub use memory::*;
pub use notifications::*;
pub use read_model::*;
pub use store::*;
pub use supabase::*;
