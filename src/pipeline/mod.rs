pub mod rag;
pub mod safety;
