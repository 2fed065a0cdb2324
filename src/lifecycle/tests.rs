use super::*;

#[test]
fn test_token_starts_clear() {
    let token = CancellationToken::new();
    assert!(!token.is_cancelled());
}

#[test]
fn test_cancel_is_shared_between_clones() {
    let token = CancellationToken::new();
    let observer = token.clone();

    token.cancel();
    assert!(observer.is_cancelled());

    token.cancel();
    assert!(observer.is_cancelled());
}

#[test]
fn test_cancel_from_another_thread() {
    let token = CancellationToken::new();
    let remote = token.clone();

    std::thread::spawn(move || remote.cancel()).join().unwrap();
    assert!(token.is_cancelled());
}

#[test]
fn test_install_ctrl_c_does_not_cancel() {
    let token = CancellationToken::new();
    let _handle = install_ctrl_c(token.clone()).unwrap();
    assert!(!token.is_cancelled());
}
