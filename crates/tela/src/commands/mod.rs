pub mod eval;
pub mod match_cmd;
pub mod monitor;
pub mod yamlget;
pub mod yamlscalar;
