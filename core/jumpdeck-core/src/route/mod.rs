//! Active route: the held route list, the next-hop cursor and the clipboard it drives.

pub mod clipboard;
pub mod cursor;
pub mod manager;
