//! Integration tests driving the MI parser the way the transport does:
//! whole sessions of debugger output pushed through `feed`.

use gdbmi::parser::MiParser;
use gdbmi::*;

#[test]
fn parses_complex_breakpoint_result() {
    let input = "15^done,bkpt={number=\"1\",type=\"breakpoint\",disp=\"keep\",enabled=\"y\",addr=\"0x08048564\",func=\"main\",file=\"vars.c\",fullname=\"/home/user/vars.c\",line=\"19\",thread-groups=[\"i1\"],times=\"0\"}\n";
    let records = MiParser::new().feed(input.as_bytes());
    assert_eq!(records.len(), 1);

    let MiRecord::Result(result) = &records[0] else {
        panic!("expected result record");
    };
    assert_eq!(result.token, Some(15));
    assert_eq!(result.class, ResultClass::Done);

    let bkpt = result.fields.get("bkpt").unwrap().as_tuple().unwrap();
    assert_eq!(bkpt.get("number").unwrap().as_str(), Some("1"));
    assert_eq!(bkpt.get("func").unwrap().as_str(), Some("main"));
    assert_eq!(bkpt.get("line").unwrap().as_str(), Some("19"));
    let groups = bkpt.get("thread-groups").unwrap().as_list().unwrap();
    assert_eq!(groups[0].as_str(), Some("i1"));
}

#[test]
fn parses_stopped_with_frame_and_args() {
    let input = "*stopped,reason=\"breakpoint-hit\",disp=\"keep\",bkptno=\"1\",thread-id=\"1\",frame={addr=\"0x08048564\",func=\"main\",args=[{name=\"argc\",value=\"1\"},{name=\"argv\",value=\"0xbfc4d4d4\"}],file=\"vars.c\",fullname=\"/home/user/vars.c\",line=\"19\",arch=\"i386:x86-64\"}\n";
    let records = MiParser::new().feed(input.as_bytes());

    let MiRecord::Async(record) = &records[0] else {
        panic!("expected async record");
    };
    assert_eq!(record.kind, AsyncKind::Exec);
    assert_eq!(record.class, "stopped");
    assert_eq!(record.field_str("reason"), Some("breakpoint-hit"));
    assert_eq!(record.thread_id(), Some(1));

    let frame = record.fields.get("frame").unwrap().as_tuple().unwrap();
    assert_eq!(frame.get("func").unwrap().as_str(), Some("main"));
    let args = frame.get("args").unwrap().as_list().unwrap();
    assert_eq!(args.len(), 2);
    let argc = args[0].as_tuple().unwrap();
    assert_eq!(argc.get("name").unwrap().as_str(), Some("argc"));
    assert_eq!(argc.get("value").unwrap().as_str(), Some("1"));
}

#[test]
fn parses_error_with_embedded_quotes() {
    let input =
        "^error,msg=\"No symbol table is loaded.  Use the \\\"file\\\" command.\",code=\"undefined-command\"\n";
    let records = MiParser::new().feed(input.as_bytes());

    let MiRecord::Result(result) = &records[0] else {
        panic!("expected result record");
    };
    assert_eq!(result.class, ResultClass::Error);
    assert_eq!(
        result.error_message(),
        Some("No symbol table is loaded.  Use the \"file\" command.")
    );
    assert_eq!(
        result.fields.get("code").unwrap().as_str(),
        Some("undefined-command")
    );
}

#[test]
fn parses_thread_lifecycle_notifications() {
    let inputs = [
        "=thread-group-added,id=\"i1\"\n",
        "=thread-group-started,id=\"i1\",pid=\"28655\"\n",
        "=thread-created,id=\"1\",group-id=\"i1\"\n",
        "=thread-selected,id=\"1\"\n",
    ];

    for input in inputs {
        let records = MiParser::new().feed(input.as_bytes());
        assert_eq!(records.len(), 1, "input {input:?}");
        let MiRecord::Async(record) = &records[0] else {
            panic!("expected async record for {input:?}");
        };
        assert_eq!(record.kind, AsyncKind::Notify);
        assert!(!record.fields.is_empty());
    }
}

#[test]
fn parses_whole_startup_burst() {
    // The shape GDB actually produces between launch and the first prompt.
    let input = concat!(
        "=thread-group-added,id=\"i1\"\n",
        "~\"GNU gdb (GDB) 13.2\\n\"\n",
        "~\"Reading symbols from vars...\\n\"\n",
        "(gdb) \n",
        "4^done\n",
        "(gdb) \n",
    );
    let records = MiParser::new().feed(input.as_bytes());

    let kinds: Vec<&str> = records
        .iter()
        .map(|r| match r {
            MiRecord::Async(_) => "async",
            MiRecord::Stream(_) => "stream",
            MiRecord::Prompt => "prompt",
            MiRecord::Result(_) => "result",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["async", "stream", "stream", "prompt", "result", "prompt"]
    );
}

#[test]
fn stop_reasons_from_wire_text() {
    let cases = [
        ("breakpoint-hit", StopReason::BreakpointHit),
        ("end-stepping-range", StopReason::EndSteppingRange),
        ("exited-normally", StopReason::ExitedNormally),
        ("signal-received", StopReason::SignalReceived),
    ];
    for (text, expected) in cases {
        assert_eq!(text.parse::<StopReason>().unwrap(), expected);
    }
}

#[test]
fn feed_is_chunking_invariant_over_a_session() {
    let input = concat!(
        "=thread-group-started,id=\"i1\",pid=\"4050\"\n",
        "5^running\n",
        "*running,thread-id=\"all\"\n",
        "(gdb) \n",
        "~\"console text with , and = inside\\n\"\n",
        "*stopped,reason=\"end-stepping-range\",thread-id=\"1\",frame={func=\"main\",line=\"20\"}\n",
        "6^done,value=\"35\"\n",
    );
    let whole = MiParser::new().feed(input.as_bytes());
    assert_eq!(whole.len(), 7);

    for chunk_size in [1, 2, 3, 5, 16, 64] {
        let mut parser = MiParser::new();
        let mut records = Vec::new();
        for chunk in input.as_bytes().chunks(chunk_size) {
            records.extend(parser.feed(chunk));
        }
        assert_eq!(records, whole, "chunk size {chunk_size}");
    }
}
