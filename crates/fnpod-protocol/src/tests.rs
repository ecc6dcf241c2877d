//! Codec behaviour against the envelope schema.

use rstest::rstest;

use crate::{
    DEFAULT_STATUS_CODE, DecodeError, Envelope, Headers, Request, Response, decode,
    decode_response, encode, encode_envelope,
};

const HELLO_ENVELOPE: &str = r#"{"req":{"path":"/","method":"GET","query_string":"","headers":{},"body":""},"res":{"script":"","body":"","status_code":0,"headers":{}}}"#;

fn headers(pairs: &[(&str, &str)]) -> Headers {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

#[test]
fn handler_mutation_passes_carried_fields_through() {
    let Envelope { req, mut res } = decode(HELLO_ENVELOPE.as_bytes()).expect("decode envelope");
    assert_eq!(req, Request::new("GET", "/"));
    res.body = "hello".to_owned();
    let encoded = String::from_utf8(encode(&res)).expect("utf8");
    assert_eq!(
        encoded,
        r#"{"script":"","body":"hello","status_code":0,"headers":{}}"#
    );
}

#[test]
fn absent_request_body_defaults_to_empty() {
    let envelope = decode(
        br#"{"req":{"path":"/a","method":"POST","query_string":"x=1","headers":{}},"res":{}}"#,
    )
    .expect("decode envelope");
    assert_eq!(envelope.req.body, "");
    assert_eq!(envelope.req.query_string, "x=1");
}

#[test]
fn null_request_body_defaults_to_empty() {
    let envelope = decode(
        br#"{"req":{"path":"/","method":"GET","query_string":"","headers":{},"body":null}}"#,
    )
    .expect("decode envelope");
    assert_eq!(envelope.req.body, "");
}

#[rstest]
#[case(r#"{"res":{}}"#, "req")]
#[case(r#"{"req":{"method":"GET","query_string":"","headers":{}}}"#, "req.path")]
#[case(r#"{"req":{"path":"/","query_string":"","headers":{}}}"#, "req.method")]
#[case(r#"{"req":{"path":"/","method":"GET","headers":{}}}"#, "req.query_string")]
#[case(r#"{"req":{"path":"/","method":"GET","query_string":""}}"#, "req.headers")]
#[case(r#"{"req":{"path":null,"method":"GET","query_string":"","headers":{}}}"#, "req.path")]
fn missing_required_fields_are_rejected(#[case] input: &str, #[case] field: &'static str) {
    let error = decode(input.as_bytes()).expect_err("decode should fail");
    assert_eq!(error, DecodeError::MissingField { field });
}

#[rstest]
#[case(r#"{"req":{"path":5,"method":"GET","query_string":"","headers":{}}}"#, "integer `5`")]
#[case(
    r#"{"req":{"path":"/","method":"GET","query_string":"","headers":{"a":1}}}"#,
    "integer `1`"
)]
#[case(
    r#"{"req":{"path":"/","method":"GET","query_string":"","headers":[]}}"#,
    "sequence"
)]
#[case(
    r#"{"req":{"path":"/","method":"GET","query_string":"","headers":{}},"res":{"status_code":"ok"}}"#,
    "string \"ok\""
)]
#[case("42", "integer `42`")]
fn mistyped_fields_report_the_offending_value(#[case] input: &str, #[case] actual: &str) {
    let error = decode(input.as_bytes()).expect_err("decode should fail");
    let DecodeError::Schema { message, line, .. } = error else {
        panic!("expected schema violation, got {error:?}");
    };
    assert_eq!(line, 1);
    assert!(
        message.contains(actual),
        "message `{message}` should mention `{actual}`"
    );
}

#[rstest]
#[case(r#"{"req":"#)]
#[case(r#"{"req":{"path":"/"]"#)]
#[case("not json")]
fn garbled_input_is_a_syntax_error(#[case] input: &str) {
    let error = decode(input.as_bytes()).expect_err("decode should fail");
    assert!(matches!(error, DecodeError::Syntax { .. }), "{error:?}");
}

#[rstest]
#[case("")]
#[case("  \t ")]
fn blank_input_is_empty(#[case] input: &str) {
    assert_eq!(decode(input.as_bytes()), Err(DecodeError::Empty));
}

#[test]
fn unknown_fields_are_ignored() {
    let envelope = decode(
        br#"{"version":2,"req":{"path":"/","method":"GET","query_string":"","headers":{},"trace":"t"},"res":{"script":"s","extra":[]}}"#,
    )
    .expect("decode envelope");
    assert_eq!(envelope.res.script, "s");
}

#[test]
fn carried_response_defaults_apply() {
    let envelope = decode(br#"{"req":{"path":"/","method":"GET","query_string":"","headers":{}}}"#)
        .expect("decode envelope");
    assert_eq!(envelope.res, Response::default());
    assert_eq!(envelope.res.status_code, DEFAULT_STATUS_CODE);
}

#[test]
fn repeated_header_keys_keep_last_value() {
    let envelope = decode(
        br#"{"req":{"path":"/","method":"GET","query_string":"","headers":{"a":"1","b":"2","a":"3"}}}"#,
    )
    .expect("decode envelope");
    assert_eq!(envelope.req.headers, headers(&[("a", "3"), ("b", "2")]));
    assert_eq!(envelope.req.header("a"), Some("3"));
}

#[test]
fn header_order_is_preserved_on_encode() {
    let response = Response {
        script: "index".to_owned(),
        body: "{}".to_owned(),
        status_code: 201,
        headers: headers(&[("z-last", "1"), ("a-first", "2")]),
    };
    let encoded = String::from_utf8(encode(&response)).expect("utf8");
    assert_eq!(
        encoded,
        r#"{"script":"index","body":"{}","status_code":201,"headers":{"z-last":"1","a-first":"2"}}"#
    );
}

#[rstest]
#[case(Response::default())]
#[case(Response {
    script: "fn/index.js".to_owned(),
    body: "line one\nline two \u{1f600}".to_owned(),
    status_code: 404,
    headers: headers(&[("content-type", "text/plain"), ("x-trace", "abc")]),
})]
fn encoded_responses_decode_to_the_same_value(#[case] response: Response) {
    let decoded = decode_response(&encode(&response)).expect("decode response");
    assert_eq!(decoded, response);
}

#[test]
fn encoded_envelopes_decode_to_the_same_value() {
    let mut req = Request::new("POST", "/items");
    req.body = "payload".to_owned();
    req.headers = headers(&[("accept", "*/*")]);
    let envelope = Envelope::new(req, Response::for_script("items"));
    let bytes = encode_envelope(&envelope).expect("encode envelope");
    assert!(!bytes.contains(&b'\n'), "encoded envelope must be one line");
    assert_eq!(decode(&bytes).expect("decode"), envelope);
}

#[test]
fn untrusted_object_output_is_read_field_by_field() {
    let carried = Response::for_script("index");
    let response = Response::from_untrusted(
        br#"{"body":{"ok":true},"status_code":"200","headers":{"a":"1","b":2}}"#,
        &carried,
    );
    assert_eq!(response.script, "index");
    assert_eq!(response.body, r#"{"ok":true}"#);
    assert_eq!(response.status_code, DEFAULT_STATUS_CODE);
    assert_eq!(response.headers, headers(&[("a", "1")]));
}

#[test]
fn untrusted_object_output_keeps_valid_fields() {
    let carried = Response::for_script("index");
    let response = Response::from_untrusted(
        br#"{"script":"other","body":"hi","status_code":204,"headers":{"x":"y"}}"#,
        &carried,
    );
    assert_eq!(
        response,
        Response {
            script: "other".to_owned(),
            body: "hi".to_owned(),
            status_code: 204,
            headers: headers(&[("x", "y")]),
        }
    );
}

#[rstest]
#[case(b"plain text output\n", "plain text output")]
#[case(b"[1,2,3]", "[1,2,3]")]
#[case(b"", "")]
fn untrusted_non_object_output_becomes_the_body(#[case] output: &[u8], #[case] body: &str) {
    let mut carried = Response::for_script("index");
    carried.status_code = 200;
    let response = Response::from_untrusted(output, &carried);
    assert_eq!(response.body, body);
    assert_eq!(response.status_code, 200);
    assert_eq!(response.script, "index");
}
