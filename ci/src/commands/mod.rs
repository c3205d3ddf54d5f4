// Compile commands
mod compile_check;

pub use compile_check::*;

mod miri_test;

pub use doc_test::*;
pub use miri_test::*;
pub use test::*;

// Lint commands
mod clippy;
mod format;

pub use clippy::*;
pub use format::*;

// Loom test suite commands
mod loom;
mod loom_check;
mod loom_clippy;

pub use loom::*;
pub use loom_check::*;
pub use loom_clippy::*;
pub use loom_test::*;

// Shuttle test suite commands
mod shuttle;
mod shuttle_check;
mod shuttle_clippy;
mod shuttle_test;

pub use shuttle::*;
pub use shuttle_check::*;
pub use shuttle_clippy::*;
pub use shuttle_test::*;
