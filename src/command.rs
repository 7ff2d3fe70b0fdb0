//! Command helpers
//!
//! Canonical AMF replies the stub sends, the `-C` flag rendering of captured
//! connect extras, and the downloader command line composed for every play.

use crate::amf::{AmfProperty, AmfValue};
use crate::link::Link;

/// `_result` for a connect, with the server identification and success
/// status the reference server presents.
pub fn connect_result(txn: f64, object_encoding: f64) -> Vec<AmfValue> {
    vec![
        AmfValue::String("_result".into()),
        AmfValue::Number(txn),
        AmfValue::Object(vec![
            ("fmsVer".to_string(), AmfValue::String("FMS/3,5,7,7009".into())),
            ("capabilities".to_string(), AmfValue::Number(31.0)),
            ("mode".to_string(), AmfValue::Number(1.0)),
        ]),
        AmfValue::Object(vec![
            ("level".to_string(), AmfValue::String("status".into())),
            (
                "code".to_string(),
                AmfValue::String("NetConnection.Connect.Success".into()),
            ),
            (
                "description".to_string(),
                AmfValue::String("Connection succeeded.".into()),
            ),
            (
                "objectEncoding".to_string(),
                AmfValue::Number(object_encoding),
            ),
            (
                "data".to_string(),
                AmfValue::Object(vec![(
                    "version".to_string(),
                    AmfValue::String("3,5,7,7009".into()),
                )]),
            ),
        ]),
    ]
}

/// `_result(txn, null, id)`, used for createStream and getStreamLength
pub fn result_number(txn: f64, id: f64) -> Vec<AmfValue> {
    vec![
        AmfValue::String("_result".into()),
        AmfValue::Number(txn),
        AmfValue::Null,
        AmfValue::Number(id),
    ]
}

/// `onStatus` for play start/stop
pub fn play_status(code: &str, description: &str, playpath: &str) -> Vec<AmfValue> {
    vec![
        AmfValue::String("onStatus".into()),
        AmfValue::Number(0.0),
        AmfValue::Object(vec![
            ("level".to_string(), AmfValue::String("status".into())),
            ("code".to_string(), AmfValue::String(code.into())),
            ("description".to_string(), AmfValue::String(description.into())),
            ("details".to_string(), AmfValue::String(playpath.into())),
            ("clientid".to_string(), AmfValue::String("clientid".into())),
        ]),
    ]
}

/// Legacy `_onbwdone` reply to `_checkbw`
pub fn onbwdone_legacy() -> Vec<AmfValue> {
    vec![
        AmfValue::String("_onbwdone".into()),
        AmfValue::Number(0.0),
        AmfValue::Null,
        AmfValue::Number(10240.0),
        AmfValue::Number(0.0),
    ]
}

/// `onBWDone` reply to `checkBandwidth`.
///
/// The initial variant sent right after connect carries no measurements.
pub fn onbwdone(initial: bool) -> Vec<AmfValue> {
    let mut values = vec![
        AmfValue::String("onBWDone".into()),
        AmfValue::Number(0.0),
        AmfValue::Null,
    ];
    if !initial {
        values.push(AmfValue::Number(10240.0));
        values.push(AmfValue::Number(0.0));
        values.push(AmfValue::Number(0.0));
        values.push(AmfValue::Number(20.0));
    }
    values
}

/// `onFCSubscribe` carrying an onStatus-shaped body
pub fn on_fc_subscribe() -> Vec<AmfValue> {
    vec![
        AmfValue::String("onFCSubscribe".into()),
        AmfValue::Number(0.0),
        AmfValue::Null,
        AmfValue::Object(vec![
            ("level".to_string(), AmfValue::String("status".into())),
            (
                "code".to_string(),
                AmfValue::String("NetStream.Play.Start".into()),
            ),
            (
                "description".to_string(),
                AmfValue::String("FCSubscribe to stream".into()),
            ),
            ("clientid".to_string(), AmfValue::Number(0.0)),
        ]),
    ]
}

/// Escape an usher token for shell-safe embedding.
///
/// Double quotes are always escaped; caret and pipe only matter to cmd.exe.
pub fn escape_usher_token(raw: &str) -> String {
    let escaped = raw.replace('"', "\\\"");
    if cfg!(windows) {
        escaped.replace('^', "^^").replace('|', "^|")
    } else {
        escaped
    }
}

/// Render extras as flat `-C` argument tokens in the fixed letter scheme
/// `[N]<T>:[name:]value`, `T ∈ {N,B,S,O}`, with `O:1`/`O:0` bracketing
/// nested objects. Arrays are flattened as objects; types outside the
/// scheme are skipped.
pub fn extras_args(props: &[AmfProperty]) -> Vec<String> {
    let mut args = Vec::new();
    dump_props(props, &mut args);
    args
}

/// Extras tokens joined into the command-line fragment appended after the
/// fixed flags (leading space included, matching the token shape ` -C x`).
pub fn extras_string(props: &[AmfProperty]) -> String {
    extras_args(props)
        .iter()
        .map(|t| format!(" -C {}", t))
        .collect()
}

fn dump_props(props: &[AmfProperty], args: &mut Vec<String>) {
    for prop in props {
        let name = prop.name.as_deref();
        match &prop.value {
            AmfValue::Number(n) => {
                args.push(format!("{}N:{}{:.6}", n_prefix(name), name_part(name), n));
            }
            AmfValue::Boolean(b) => {
                args.push(format!(
                    "{}B:{}{}",
                    n_prefix(name),
                    name_part(name),
                    if *b { '1' } else { '0' }
                ));
            }
            AmfValue::String(s) => {
                args.push(format!("{}S:{}{}", n_prefix(name), name_part(name), s));
            }
            AmfValue::Null => {
                args.push(format!("{}Z:{}", n_prefix(name), name_part(name)));
            }
            AmfValue::Object(members)
            | AmfValue::EcmaArray(members)
            | AmfValue::TypedObject {
                properties: members,
                ..
            } => {
                args.push(format!("{}O:{}1", n_prefix(name), name_part(name)));
                let nested: Vec<AmfProperty> = members
                    .iter()
                    .map(|(k, v)| AmfProperty::named(k.clone(), v.clone()))
                    .collect();
                dump_props(&nested, args);
                args.push("O:0".to_string());
            }
            AmfValue::Array(elements) => {
                // Flattened as an object with anonymous members
                args.push(format!("{}O:{}1", n_prefix(name), name_part(name)));
                let nested: Vec<AmfProperty> = elements
                    .iter()
                    .map(|v| AmfProperty::anonymous(v.clone()))
                    .collect();
                dump_props(&nested, args);
                args.push("O:0".to_string());
            }
            // Undefined, Date, Xml: no letter in the scheme
            _ => {}
        }
    }
}

fn n_prefix(name: Option<&str>) -> &'static str {
    if name.is_some() {
        "N"
    } else {
        ""
    }
}

fn name_part(name: Option<&str>) -> String {
    match name {
        Some(n) => format!("{}:", n),
        None => String::new(),
    }
}

/// A composed downloader invocation: the printable line appended to
/// `Command.txt` and the argv used when the stub spawns the process.
#[derive(Debug)]
pub struct DownloaderCommand {
    pub line: String,
    pub argv: Vec<String>,
}

/// Compose the downloader command from the captured link fields.
///
/// `token_flag` is `--jtv` on the proxy path and `-j` on the stub path.
pub fn downloader_command(link: &Link, live: bool, outfile: &str, token_flag: &str) -> DownloaderCommand {
    let tc_url = super::naming::strip_params(link.tc_url.as_deref().unwrap_or(""));
    let swf_url = super::naming::strip_params(link.swf_url.as_deref().unwrap_or(""));
    let app = link.app.as_deref().unwrap_or("");
    let flash_ver = link.flash_ver.as_deref().unwrap_or("");
    let page_url = link.page_url.as_deref().unwrap_or("");
    let playpath = link.playpath.as_deref().unwrap_or("");

    let mut line = format!(
        "rtmpdump -r \"{}\" -a \"{}\" -f \"{}\" -W \"{}\" -p \"{}\"",
        tc_url, app, flash_ver, swf_url, page_url
    );
    let mut argv = vec![
        "rtmpdump".to_string(),
        "-r".to_string(),
        tc_url,
        "-a".to_string(),
        app.to_string(),
        "-f".to_string(),
        flash_ver.to_string(),
        "-W".to_string(),
        swf_url,
        "-p".to_string(),
        page_url.to_string(),
    ];

    // The token was escaped when it was captured
    if let Some(token) = link.usher_token.as_deref() {
        line.push_str(&format!(" {} \"{}\"", token_flag, token));
        argv.push(token_flag.to_string());
        argv.push(token.to_string());
    }

    for token in extras_args(&link.extras) {
        line.push_str(&format!(" -C {}", token));
        argv.push("-C".to_string());
        argv.push(token);
    }

    if live {
        line.push_str(" --live");
        argv.push("--live".to_string());
    }

    line.push_str(&format!(" -y \"{}\"", playpath));
    argv.push("-y".to_string());
    argv.push(playpath.to_string());

    line.push_str(&format!(" -o \"{}\"", outfile));
    argv.push("-o".to_string());
    argv.push(outfile.to_string());

    DownloaderCommand { line, argv }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::amf0;

    #[test]
    fn test_connect_result_shape() {
        let values = connect_result(1.0, 3.0);
        assert_eq!(values[0], AmfValue::String("_result".into()));
        assert_eq!(values[1], AmfValue::Number(1.0));
        assert_eq!(values[2].get_string("fmsVer"), Some("FMS/3,5,7,7009"));
        assert_eq!(values[2].get_number("capabilities"), Some(31.0));
        assert_eq!(
            values[3].get_string("code"),
            Some("NetConnection.Connect.Success")
        );
        assert_eq!(values[3].get_number("objectEncoding"), Some(3.0));
        assert_eq!(
            values[3].get("data").unwrap().get_string("version"),
            Some("3,5,7,7009")
        );
    }

    #[test]
    fn test_connect_result_roundtrip() {
        let values = connect_result(2.0, 0.0);
        let encoded = amf0::encode_all(&values);
        let decoded = amf0::decode_all(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_result_number() {
        let values = result_number(4.0, 1.0);
        assert_eq!(values[0], AmfValue::String("_result".into()));
        assert_eq!(values[1], AmfValue::Number(4.0));
        assert_eq!(values[2], AmfValue::Null);
        assert_eq!(values[3], AmfValue::Number(1.0));
    }

    #[test]
    fn test_play_status() {
        let values = play_status("NetStream.Play.Start", "Started playing", "stream01");
        assert_eq!(values[0], AmfValue::String("onStatus".into()));
        assert_eq!(values[2].get_string("code"), Some("NetStream.Play.Start"));
        assert_eq!(values[2].get_string("details"), Some("stream01"));
        assert_eq!(values[2].get_string("level"), Some("status"));
    }

    #[test]
    fn test_onbwdone_variants() {
        assert_eq!(onbwdone(true).len(), 3);
        let full = onbwdone(false);
        assert_eq!(full.len(), 7);
        assert_eq!(full[3], AmfValue::Number(10240.0));
        assert_eq!(full[6], AmfValue::Number(20.0));

        let legacy = onbwdone_legacy();
        assert_eq!(legacy[0], AmfValue::String("_onbwdone".into()));
        assert_eq!(legacy.len(), 5);
    }

    #[test]
    fn test_on_fc_subscribe() {
        let values = on_fc_subscribe();
        assert_eq!(values[0], AmfValue::String("onFCSubscribe".into()));
        assert_eq!(values[3].get_string("code"), Some("NetStream.Play.Start"));
        assert_eq!(
            values[3].get_string("description"),
            Some("FCSubscribe to stream")
        );
        assert_eq!(values[3].get_number("clientid"), Some(0.0));
    }

    #[test]
    fn test_escape_usher_token() {
        assert_eq!(escape_usher_token(r#"a"b"#), r#"a\"b"#);
        if !cfg!(windows) {
            assert_eq!(escape_usher_token("a^b|c"), "a^b|c");
        }
    }

    #[test]
    fn test_extras_scalars() {
        let props = vec![
            AmfProperty::anonymous(AmfValue::Number(12.0)),
            AmfProperty::anonymous(AmfValue::Boolean(true)),
            AmfProperty::anonymous(AmfValue::String("tok".into())),
            AmfProperty::anonymous(AmfValue::Null),
        ];
        assert_eq!(
            extras_args(&props),
            vec!["N:12.000000", "B:1", "S:tok", "Z:"]
        );
    }

    #[test]
    fn test_extras_named() {
        let props = vec![AmfProperty::named("auth", AmfValue::String("abc".into()))];
        assert_eq!(extras_args(&props), vec!["NS:auth:abc"]);
    }

    #[test]
    fn test_extras_nested_object() {
        let props = vec![AmfProperty::anonymous(AmfValue::Object(vec![
            ("a".to_string(), AmfValue::Number(1.0)),
            ("b".to_string(), AmfValue::String("x".into())),
        ]))];
        assert_eq!(
            extras_args(&props),
            vec!["O:1", "NN:a:1.000000", "NS:b:x", "O:0"]
        );
    }

    #[test]
    fn test_extras_array_flattened() {
        let props = vec![AmfProperty::anonymous(AmfValue::Array(vec![
            AmfValue::Number(1.0),
            AmfValue::Number(2.0),
        ]))];
        assert_eq!(
            extras_args(&props),
            vec!["O:1", "N:1.000000", "N:2.000000", "O:0"]
        );
    }

    #[test]
    fn test_extras_string_fragment() {
        let props = vec![
            AmfProperty::anonymous(AmfValue::Boolean(false)),
            AmfProperty::anonymous(AmfValue::String("t".into())),
        ];
        assert_eq!(extras_string(&props), " -C B:0 -C S:t");
    }

    #[test]
    fn test_downloader_command_line() {
        let mut link = Link::new();
        link.apply_tc_url("rtmp://origin.example:1935/live");
        link.app = Some("live".to_string());
        link.flash_ver = Some("WIN 10,0,32,18".to_string());
        link.playpath = Some("stream01".to_string());

        let cmd = downloader_command(&link, true, "2026-01-01_00-00-00_stream01.flv", "--jtv");
        assert!(cmd
            .line
            .starts_with("rtmpdump -r \"rtmp://origin.example:1935/live\" -a \"live\" -f \"WIN 10,0,32,18\""));
        assert!(cmd.line.contains(" --live "));
        assert!(cmd.line.contains(" -y \"stream01\""));
        assert!(cmd.line.ends_with(" -o \"2026-01-01_00-00-00_stream01.flv\""));
        assert_eq!(cmd.argv[0], "rtmpdump");
        assert_eq!(cmd.argv.last().unwrap(), "2026-01-01_00-00-00_stream01.flv");
    }

    #[test]
    fn test_downloader_command_token_and_extras() {
        let mut link = Link::new();
        link.apply_tc_url("rtmp://h/app");
        link.usher_token = Some(escape_usher_token("tok\"en"));
        link.extras = vec![AmfProperty::anonymous(AmfValue::String("x".into()))];
        link.playpath = Some("p".to_string());

        let cmd = downloader_command(&link, false, "out.flv", "-j");
        assert!(cmd.line.contains(" -j \"tok\\\"en\""));
        assert!(cmd.line.contains(" -C S:x"));
        assert!(!cmd.line.contains("--live"));

        let j = cmd.argv.iter().position(|a| a == "-j").unwrap();
        assert_eq!(cmd.argv[j + 1], "tok\\\"en");
    }

    #[test]
    fn test_downloader_command_strips_query() {
        let mut link = Link::new();
        link.apply_tc_url("rtmp://h/app?sig=1");
        link.swf_url = Some("http://cdn/p.swf?v=2".to_string());
        link.playpath = Some("p?raw=kept".to_string());

        let cmd = downloader_command(&link, false, "out.flv", "--jtv");
        assert!(cmd.line.contains("-r \"rtmp://h/app\""));
        assert!(cmd.line.contains("-W \"http://cdn/p.swf\""));
        // The playpath is replayed verbatim
        assert!(cmd.line.contains(" -y \"p?raw=kept\""));
    }
}
