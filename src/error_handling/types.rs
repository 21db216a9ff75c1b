use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    JsonError(String),
    DirectoryCreateFailed(String),
    HomeNotFound,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::JsonError(e) => write!(f, "JSON parsing error: {}", e),
            ConfigError::DirectoryCreateFailed(e) => write!(f, "Directory error: {}", e),
            ConfigError::HomeNotFound => write!(f, "Home directory could not be resolved"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum SessionError {
    CreationFailed,
    NotFound,
    StorageError(StorageError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::CreationFailed => write!(f, "Session creation failed"),
            SessionError::NotFound => write!(f, "Session not found"),
            SessionError::StorageError(e) => write!(f, "Session storage error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::StorageError(err)
    }
}

#[derive(Debug)]
pub enum CaptchaError {
    ImageDecodeFailed(String),
    ImageSaveFailed(std::io::Error),
    StorageError(StorageError),
}

impl fmt::Display for CaptchaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptchaError::ImageDecodeFailed(e) => write!(f, "CAPTCHA image decode failed: {}", e),
            CaptchaError::ImageSaveFailed(e) => write!(f, "CAPTCHA image save failed: {}", e),
            CaptchaError::StorageError(e) => write!(f, "CAPTCHA storage error: {}", e),
        }
    }
}

impl std::error::Error for CaptchaError {}

impl From<std::io::Error> for CaptchaError {
    fn from(err: std::io::Error) -> Self {
        CaptchaError::ImageSaveFailed(err)
    }
}

#[derive(Debug)]
pub enum CaptureError {
    DumpFailed(std::io::Error),
    ExportFailed(std::io::Error),
    StorageError(StorageError),
    SessionError(SessionError),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::DumpFailed(e) => write!(f, "Request dump failed: {}", e),
            CaptureError::ExportFailed(e) => write!(f, "Export failed: {}", e),
            CaptureError::StorageError(e) => write!(f, "Capture storage error: {}", e),
            CaptureError::SessionError(e) => write!(f, "Capture session error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<SessionError> for CaptureError {
    fn from(err: SessionError) -> Self {
        CaptureError::SessionError(err)
    }
}

#[derive(Debug)]
pub enum BridgeError {
    BindError(std::io::Error),
    SockError(std::io::Error),
    ChannelFailed,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::BindError(e) => write!(f, "Bridge bind error: {}", e),
            BridgeError::SockError(e) => write!(f, "Bridge socket error: {}", e),
            BridgeError::ChannelFailed => write!(f, "Bridge channel failed"),
        }
    }
}

impl std::error::Error for BridgeError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    BridgeError(BridgeError),
    SessionError(SessionError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::BridgeError(e) => write!(f, "Bridge error: {}", e),
            ControllerError::SessionError(e) => write!(f, "Session error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}
