//! Built-in tool implementations. Each module exposes `registrations`
//! bundling its advertised schema with a typed handler.

pub(crate) mod apply_patch;
pub(crate) mod exec_pty;
pub(crate) mod grep_files;
pub(crate) mod list_dir;
pub(crate) mod read_file;
pub(crate) mod shell;
