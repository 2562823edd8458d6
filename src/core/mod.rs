pub mod decoder;
pub mod events;
pub mod fault;
pub mod hash;
pub mod iseq;
pub mod layout;
pub mod memory;
pub mod object;
pub mod process;
pub mod symbols;
pub mod types;
pub mod value;
