#![cfg(test)]

use std::{fs, path::PathBuf};

use protocrd::{compile_crds, compile_crds_from_files, fixtures::check_file, run_fixtures, Config};

fn testdata() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../testdata")
}

fn crds() -> Vec<protocrd::CustomResourceDefinition> {
    let dir = testdata();
    compile_crds_from_files(&dir.join("gateway.proto"), &dir.join("protocrd.yaml")).expect("compile failed")
}

#[test]
fn test_testdata_fixtures_pass() {
    let report = run_fixtures(&crds(), &testdata()).expect("fixture run failed");
    let failures: Vec<String> = report.failures.iter().map(|f| f.to_string()).collect();
    assert!(report.is_ok(), "{:#?}", failures);
    assert_eq!(report.checked, 14);
}

#[test]
fn test_each_invalid_gateway_is_rejected_for_its_reason() {
    let crds = crds();
    let text = fs::read_to_string(testdata().join("gateway/invalid.yaml")).unwrap();
    let docs = protocrd::fixtures::load_documents(&text).unwrap();
    let expected = [
        "spec.servers: Required value",
        "spec.servers[0].port.number: should be less than or equal to 65535",
        "spec.servers[0]: tls is required on port 443",
        "spec.servers[0].tls: At most one of [credentialName, serverCertificate] should be set",
        "spec.servers[0].tls: credentials are required unless mode is PASSTHROUGH",
        "spec.servers[0].hostnames: unknown field",
        "spec.servers[0].drainTimeout: must be a valid duration greater than 1ms",
        "spec.servers[0].port.protocol: unsupported value \"SMTP\"",
        "spec.servers[0].name: should match '^[a-z0-9-]*$'",
    ];
    assert_eq!(docs.len(), expected.len());
    for (doc, want) in docs.iter().zip(expected) {
        let violations = protocrd::fixtures::validate_document(&crds, doc).unwrap();
        let messages: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
        assert!(messages.iter().any(|m| m.starts_with(want)), "{:?} does not contain {:?}", messages, want);
    }
}

#[test]
fn test_misfiled_document_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let resource = dir.path().join("gateway");
    fs::create_dir(&resource).unwrap();
    fs::write(
        resource.join("valid.yaml"),
        "apiVersion: networking.demo.io/v1\nkind: Gateway\nmetadata: {name: oops}\nspec:\n  servers:\n  - port: {number: 0}\n    hosts: [a]\n",
    )
    .unwrap();
    fs::write(
        resource.join("invalid.yaml"),
        "apiVersion: networking.demo.io/v1\nkind: Gateway\nmetadata: {name: fine}\nspec:\n  servers:\n  - port: {number: 80}\n    hosts: [a]\n",
    )
    .unwrap();

    let report = run_fixtures(&crds(), dir.path()).unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures[0].expected_valid);
    assert_eq!(report.failures[0].name.as_deref(), Some("oops"));
    assert!(!report.failures[1].expected_valid);

    let single = check_file(&crds(), &resource.join("invalid.yaml"), true).unwrap();
    assert!(single.is_ok());
}

#[test]
fn test_compile_crds_in_memory() {
    let config = Config::from_yaml(
        "resources:\n  - {message: shop.Order, group: shop.io, kind: Order, versions: [v1], scope: Cluster}",
    )
    .unwrap();
    let crds = compile_crds("syntax = \"proto3\";\npackage shop;\nmessage Order { string id = 1; }\n", &config).unwrap();
    assert_eq!(crds[0].spec.scope, "Cluster");
    assert_eq!(crds[0].metadata.name, "orders.shop.io");
}
