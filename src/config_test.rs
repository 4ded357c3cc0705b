use super::*;

/// # Safety
/// Tests must run with `--test-threads=1` to avoid env races.
unsafe fn clear_wrapper_env() {
    unsafe {
        std::env::remove_var(ENV_REQUEST_TIMEOUT_MS);
        std::env::remove_var(ENV_MAX_SEND_QUEUE);
        std::env::remove_var(ENV_ERROR_FIELDS);
    }
}

#[test]
fn default_options() {
    let opts = Options::default();
    assert_eq!(opts.request_timeout, None);
    assert_eq!(opts.max_send_queue, 10);
    assert_eq!(opts.error_fields, ErrorFields::MessageOnly);
}

#[test]
fn from_env_reads_overrides_and_defaults() {
    unsafe {
        clear_wrapper_env();
        std::env::set_var(ENV_REQUEST_TIMEOUT_MS, "250");
        std::env::set_var(ENV_MAX_SEND_QUEUE, "3");
        std::env::set_var(ENV_ERROR_FIELDS, "all");
    }

    let opts = Options::from_env().unwrap();
    assert_eq!(opts.request_timeout, Some(Duration::from_millis(250)));
    assert_eq!(opts.max_send_queue, 3);
    assert_eq!(opts.error_fields, ErrorFields::All);

    unsafe {
        clear_wrapper_env();
        std::env::set_var(ENV_REQUEST_TIMEOUT_MS, "not-a-number");
    }

    let opts = Options::from_env().unwrap();
    assert_eq!(opts, Options::default());

    unsafe {
        clear_wrapper_env();
        std::env::set_var(ENV_ERROR_FIELDS, "everything");
    }

    let err = Options::from_env().unwrap_err();
    assert!(err.to_string().contains("everything"));

    unsafe { clear_wrapper_env() };
}

#[test]
fn zero_timeout_means_none() {
    assert_eq!(timeout_from_millis(0), None);
    assert_eq!(timeout_from_millis(5), Some(Duration::from_millis(5)));
    assert_eq!(Options::default().with_request_timeout(Duration::ZERO).request_timeout, None);
}

#[test]
fn parse_error_fields_accepts_known_names() {
    assert_eq!(parse_error_fields(None).unwrap(), ErrorFields::MessageOnly);
    assert_eq!(parse_error_fields(Some("message")).unwrap(), ErrorFields::MessageOnly);
    assert_eq!(parse_error_fields(Some("all")).unwrap(), ErrorFields::All);
    assert!(parse_error_fields(Some("stack")).is_err());
}

#[test]
fn builders_chain() {
    let opts = Options::default()
        .with_request_timeout(Duration::from_secs(2))
        .with_max_send_queue(1)
        .with_error_fields(ErrorFields::All);
    assert_eq!(opts.request_timeout, Some(Duration::from_secs(2)));
    assert_eq!(opts.max_send_queue, 1);
    assert_eq!(opts.error_fields, ErrorFields::All);
}
