#[cfg(test)]
mod tests {
    use crate::{IpcError, Result};
    use std::error::Error;

    #[test]
    fn test_ipc_error_display() {
        let err = IpcError::SendFailed("broken pipe".to_string());
        assert_eq!(err.to_string(), "Failed to send message: broken pipe");

        let err = IpcError::ProtocolError("invalid message format".to_string());
        assert_eq!(err.to_string(), "Protocol error: invalid message format");

        let err = IpcError::FrameTooLarge { size: 70_000, max: 65_536 };
        assert_eq!(
            err.to_string(),
            "Frame of 70000 bytes exceeds maximum of 65536 bytes"
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_failure() -> Result<Vec<u8>> {
            Err(IpcError::ReceiveFailed("stream reset".to_string()))
        }

        assert!(returns_failure().is_err());
    }

    #[test]
    fn test_error_trait_implementation() {
        let err = IpcError::DeserializationFailed("test".to_string());
        let _: &dyn Error = &err;
        assert!(err.source().is_none());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(IpcError::SendFailed("test".to_string()).code(), "IPC002");
        assert_eq!(IpcError::ReceiveFailed("test".to_string()).code(), "IPC003");
        assert_eq!(
            IpcError::SerializationFailed("test".to_string()).code(),
            "IPC004"
        );
        assert_eq!(
            IpcError::DeserializationFailed("test".to_string()).code(),
            "IPC005"
        );
        assert_eq!(IpcError::FrameTooLarge { size: 2, max: 1 }.code(), "IPC006");
        assert_eq!(IpcError::ProtocolError("test".to_string()).code(), "IPC007");
    }
}
