pub mod client;
pub mod server;

use crate::fs::errors::FsError;
use crate::fs::types::{Attr, DirEntry, SetAttrValid, StatfsInfo};

pub use client::VolumeClient;
pub use server::{ApiConfig, ApiServer};

/// The VFS-style RPC surface served to an attached client. Every response is
/// typed; errors travel as [`FsError`] values.
#[tarpc::service]
pub trait VolumeApi {
    async fn get_attr(inode: u64) -> Result<Attr, FsError>;
    async fn set_attr(attr: Attr, valid: SetAttrValid) -> Result<Attr, FsError>;
    async fn lookup(parent: u64, name: String) -> Result<(String, Attr), FsError>;
    async fn create(
        parent: u64,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError>;
    async fn mk_dir(
        parent: u64,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError>;
    async fn read(inode: u64, offset: u64, size: u64) -> Result<Vec<u8>, FsError>;
    async fn write(inode: u64, offset: u64, payload: Vec<u8>) -> Result<(), FsError>;
    async fn remove(parent: u64, name: String) -> Result<(), FsError>;
    async fn rename(
        old_parent: u64,
        old_name: String,
        new_parent: u64,
        new_name: String,
    ) -> Result<(), FsError>;
    async fn symlink(
        parent: u64,
        name: String,
        target: String,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError>;
    async fn read_link(inode: u64) -> Result<String, FsError>;
    async fn get_xattr(inode: u64, name: String) -> Result<Vec<u8>, FsError>;
    async fn set_xattr(inode: u64, name: String, value: Vec<u8>) -> Result<(), FsError>;
    async fn list_xattr(inode: u64) -> Result<Vec<String>, FsError>;
    async fn remove_xattr(inode: u64, name: String) -> Result<(), FsError>;
    async fn read_dir_all(inode: u64) -> Result<Vec<DirEntry>, FsError>;
    async fn statfs() -> Result<StatfsInfo, FsError>;
}
