//! QAP1 command and response codes.

/// Marks a message as a response.
pub const CMD_RESP: u32 = 0x10000;

/// Successful response.
pub const RESP_OK: u32 = CMD_RESP | 0x0001;

/// Error response; the status lives in bits 24..31.
pub const RESP_ERR: u32 = CMD_RESP | 0x0002;

/// Extracts the status byte from a response command word.
pub fn cmd_status(command: u32) -> u8 {
    ((command >> 24) & 0x7f) as u8
}

/// Builds an error response word carrying `status`.
pub fn error_response(status: u8) -> u32 {
    RESP_ERR | ((u32::from(status) & 0x7f) << 24)
}

/// Request commands understood by Rserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Login,
    VoidEval,
    Eval,
    Shutdown,
    OpenFile,
    CreateFile,
    CloseFile,
    ReadFile,
    WriteFile,
    RemoveFile,
    SetSexp,
    AssignSexp,
    DetachSession,
    DetachedVoidEval,
    AttachSession,
    CtrlEval,
    CtrlShutdown,
    CtrlSource,
    /// Site-specific status query.
    CustomStatus,
}

impl Command {
    pub const fn code(self) -> u32 {
        match self {
            Command::Login => 0x001,
            Command::VoidEval => 0x002,
            Command::Eval => 0x003,
            Command::Shutdown => 0x004,
            Command::OpenFile => 0x010,
            Command::CreateFile => 0x011,
            Command::CloseFile => 0x012,
            Command::ReadFile => 0x013,
            Command::WriteFile => 0x014,
            Command::RemoveFile => 0x015,
            Command::SetSexp => 0x020,
            Command::AssignSexp => 0x021,
            Command::DetachSession => 0x030,
            Command::DetachedVoidEval => 0x031,
            Command::AttachSession => 0x032,
            Command::CtrlEval => 0x042,
            Command::CtrlShutdown => 0x044,
            Command::CtrlSource => 0x045,
            Command::CustomStatus => 0x050,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        let cmd = match code {
            0x001 => Command::Login,
            0x002 => Command::VoidEval,
            0x003 => Command::Eval,
            0x004 => Command::Shutdown,
            0x010 => Command::OpenFile,
            0x011 => Command::CreateFile,
            0x012 => Command::CloseFile,
            0x013 => Command::ReadFile,
            0x014 => Command::WriteFile,
            0x015 => Command::RemoveFile,
            0x020 => Command::SetSexp,
            0x021 => Command::AssignSexp,
            0x030 => Command::DetachSession,
            0x031 => Command::DetachedVoidEval,
            0x032 => Command::AttachSession,
            0x042 => Command::CtrlEval,
            0x044 => Command::CtrlShutdown,
            0x045 => Command::CtrlSource,
            0x050 => Command::CustomStatus,
            _ => return None,
        };
        Some(cmd)
    }
}
