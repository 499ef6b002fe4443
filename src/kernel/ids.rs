// 16-bit handle ids for timer waits. 0 is the permanent "invalid" value and
// is never issued; the counter wraps from u16::MAX back to 1, skipping ids
// still held by a live wait.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WaitId(u16);

impl WaitId {
    pub const INVALID: WaitId = WaitId(0);

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Marks the handle as spent.
    pub fn invalidate(&mut self) {
        *self = Self::INVALID;
    }
}

impl fmt::Display for WaitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "wait#{}", self.0)
        } else {
            f.write_str("wait#invalid")
        }
    }
}

#[derive(Debug)]
pub struct IdGenerator {
    last: u16,
}

impl IdGenerator {
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next_id(&mut self) -> WaitId {
        self.last = if self.last == u16::MAX { 1 } else { self.last + 1 };
        WaitId(self.last)
    }

    /// Next id for which `in_use` is false. Callers hold far fewer than
    /// `u16::MAX` ids, so this terminates.
    pub fn next_free(&mut self, in_use: impl Fn(WaitId) -> bool) -> WaitId {
        loop {
            let id = self.next_id();
            if !in_use(id) {
                return id;
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
