mod build;
mod export;
mod search;
mod show;

pub use build::*;
pub use export::*;
pub use search::*;
pub use show::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
