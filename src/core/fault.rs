use std::fmt;

/// The x86-64 page fault error code (`REG_ERR` in a SIGSEGV handler's ucontext)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaultReason {
    pub code: u64,
    pub protection_fault: bool,
    pub write_access: bool,
    pub user_mode: bool,
}

impl FaultReason {
    pub fn from_error_code(code: u64) -> FaultReason {
        FaultReason {
            code,
            protection_fault: code & 0x1 != 0,
            write_access: code & 0x2 != 0,
            user_mode: code & 0x4 != 0,
        }
    }
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:#x} ({} {} {})",
            self.code,
            if self.protection_fault {
                "ProtectionFault"
            } else {
                "NoPageFound"
            },
            if self.write_access {
                "WriteAccess"
            } else {
                "ReadAccess"
            },
            if self.user_mode { "UserMode" } else { "KernelMode" }
        )
    }
}
