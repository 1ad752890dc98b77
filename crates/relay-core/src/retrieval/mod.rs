// Retrieval integration
//
// - `mcp`: Model Context Protocol client pool (stdio JSON-RPC over child
//   processes)
// - `vector`: vector-store trait, HTTP adapter, priority-fallback manager
// - `embedding`: embedding-provider trait, HTTP adapter, fallback manager

pub mod embedding;
pub mod mcp;
pub mod vector;
