pub mod chunk;
pub mod directory;
pub mod inode;
pub mod xattr;

pub use chunk::ChunkStore;
pub use directory::DirectoryStore;
pub use inode::InodeStore;
pub use xattr::XattrStore;
