//! # Leaf Permissions
//!
//! Decoded view of the permission and state bits of a 4 KiB leaf entry.
//!
//! On the wire (in [`PageEntryBits`]) write permission and the software
//! copy-on-write marker are two independent bits. Here they are folded into a
//! single [`Access`] tag so the combination "writable *and* copy-on-write"
//! cannot be constructed. Decoding a raw entry that carries both bits yields
//! [`CorruptedEntry`].

use crate::PageEntryBits;

/// What a store through this mapping does.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Access {
    /// Stores fault and are not resolvable (e.g. program text).
    ReadOnly,
    /// Stores go straight to the frame.
    Writable,
    /// Stores fault; the frame is shared and a private copy must be made first.
    CopyOnWrite,
}

/// Permission tag of one leaf mapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Permissions {
    /// Accessible from CPL 3.
    pub user: bool,
    pub access: Access,
    /// Instruction fetches allowed (NX clear).
    pub executable: bool,
}

/// A raw entry had both `writable` and `copy_on_write` set.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("page table entry {0:#018x} is both writable and copy-on-write")]
pub struct CorruptedEntry(pub u64);

impl Permissions {
    /// User data: read/write, no execute.
    pub const USER_RW: Self = Self::new(true, Access::Writable, false);

    /// User read-only data.
    pub const USER_RO: Self = Self::new(true, Access::ReadOnly, false);

    /// User text: read + execute.
    pub const USER_RX: Self = Self::new(true, Access::ReadOnly, true);

    /// Kernel-only data.
    pub const KERNEL_RW: Self = Self::new(false, Access::Writable, false);

    #[inline]
    #[must_use]
    pub const fn new(user: bool, access: Access, executable: bool) -> Self {
        Self {
            user,
            access,
            executable,
        }
    }

    #[inline]
    #[must_use]
    pub const fn with_access(self, access: Access) -> Self {
        Self { access, ..self }
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self.access, Access::Writable)
    }

    #[inline]
    #[must_use]
    pub const fn is_copy_on_write(self) -> bool {
        matches!(self.access, Access::CopyOnWrite)
    }

    /// Tag to use once the frame becomes shared: writable turns into
    /// copy-on-write, everything else is kept as is.
    #[inline]
    #[must_use]
    pub const fn shared(self) -> Self {
        match self.access {
            Access::Writable => self.with_access(Access::CopyOnWrite),
            Access::ReadOnly | Access::CopyOnWrite => self,
        }
    }

    /// Tag to use once the mapping owns a private frame again.
    #[inline]
    #[must_use]
    pub const fn private(self) -> Self {
        match self.access {
            Access::CopyOnWrite => self.with_access(Access::Writable),
            Access::ReadOnly | Access::Writable => self,
        }
    }

    /// Write these permissions into `bits`, leaving address and cache bits alone.
    #[inline]
    #[must_use]
    pub const fn apply(self, bits: PageEntryBits) -> PageEntryBits {
        bits.with_user_access(self.user)
            .with_writable(matches!(self.access, Access::Writable))
            .with_copy_on_write(matches!(self.access, Access::CopyOnWrite))
            .with_no_execute(!self.executable)
    }

    /// Decode the permission bits of a leaf.
    ///
    /// # Errors
    /// [`CorruptedEntry`] if the entry is writable and copy-on-write at once.
    pub const fn decode(bits: PageEntryBits) -> Result<Self, CorruptedEntry> {
        let access = match (bits.writable(), bits.copy_on_write()) {
            (false, false) => Access::ReadOnly,
            (true, false) => Access::Writable,
            (false, true) => Access::CopyOnWrite,
            (true, true) => return Err(CorruptedEntry(bits.into_bits())),
        };
        Ok(Self::new(bits.user_access(), access, !bits.no_execute()))
    }
}
