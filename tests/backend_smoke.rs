use fpinn::backend::{BackendKind, smoke_check};

#[test]
fn every_compiled_backend_loads() {
    for kind in BackendKind::ALL.into_iter().filter(BackendKind::is_enabled) {
        smoke_check(kind).unwrap_or_else(|e| panic!("backend {kind} failed: {e}"));
    }
}

#[test]
fn selector_defaults_to_ndarray() {
    // DDEBACKEND が設定されていれば、その値が有効であること
    let kind = BackendKind::from_env().unwrap();
    if std::env::var_os(fpinn::backend::BACKEND_ENV).is_none() {
        assert_eq!(kind, BackendKind::NdArray);
    }
}
