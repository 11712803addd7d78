#[test]
fn public_api_compiles() {
    let t = trybuild::TestCases::new();

    // Host extension points
    t.pass("tests/api/pass/*.rs");
}
