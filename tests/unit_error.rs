use td::error::{exit_codes, BlobStage, Error, JsonError};

#[test]
fn exit_codes_map_correctly() {
    let user = Error::InvalidArgument("bad".to_string());
    assert_eq!(user.exit_code(), exit_codes::USER_ERROR);

    let full = Error::StorageQuotaExceeded {
        needed: 10,
        quota: 5,
    };
    assert_eq!(full.exit_code(), exit_codes::STORAGE_FULL);

    let too_big = Error::PayloadTooLarge { size: 2, limit: 1 };
    assert_eq!(too_big.exit_code(), exit_codes::STORAGE_FULL);

    let op = Error::blob(BlobStage::Write, "disk gone");
    assert_eq!(op.exit_code(), exit_codes::OPERATION_FAILED);
}

#[test]
fn json_error_includes_code_and_details() {
    let err = Error::TaskNotFound("abc123".to_string());
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::USER_ERROR);
    assert!(json.error.contains("Task not found"));
    assert_eq!(json.details.unwrap()["id"], "abc123");
}

#[test]
fn blob_errors_name_their_stage() {
    let setup = Error::blob(BlobStage::Setup, "version 9");
    let write = Error::blob(BlobStage::Write, "quota");
    assert!(setup.to_string().contains("setup"));
    assert!(write.to_string().contains("write"));
    assert_eq!(setup.details().unwrap()["stage"], "setup");
}

#[test]
fn only_slot_overflow_counts_as_quota() {
    assert!(Error::StorageQuotaExceeded { needed: 2, quota: 1 }.is_quota());
    assert!(!Error::PayloadTooLarge { size: 2, limit: 1 }.is_quota());
}
