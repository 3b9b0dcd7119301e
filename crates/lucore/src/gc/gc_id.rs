// Typed indices into the object pools.
//
// A value cell stores one of these as a raw u32 together with its type tag,
// so ids must stay 4 bytes and Copy.

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(self) -> u32 {
                self.0
            }
        }
    };
}

define_id!(
    /// Interned string handle. Equal content implies equal id.
    StringId
);
define_id!(TableId);
define_id!(ClosureId);
define_id!(UpvalueId);
define_id!(UserdataId);
define_id!(ThreadId);

/// Unified GC object identifier used by the gray lists and the barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcId {
    String(StringId),
    Table(TableId),
    Closure(ClosureId),
    Upvalue(UpvalueId),
    Userdata(UserdataId),
    Thread(ThreadId),
}
