//! Push-style JSON event stream on top of `serde_json`.
//!
//! The input is read once, without building a document, and every token is
//! forwarded to a [`JsonEventSink`]. Errors raised by the sink abort parsing
//! and are returned unchanged, with the input position attached to parse errors.

use std::fmt;
use std::io::{self, Read};

use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Receiver of JSON tokens in document order.
pub trait JsonEventSink {
    fn start_object(&mut self) -> Result<()>;
    fn key(&mut self, key: String) -> Result<()>;
    fn end_object(&mut self) -> Result<()>;
    fn start_array(&mut self) -> Result<()>;
    fn end_array(&mut self) -> Result<()>;
    fn string(&mut self, value: String) -> Result<()>;
    /// Null, boolean or number
    fn scalar(&mut self, value: Value) -> Result<()>;
}

/// Reader that counts the bytes handed to the parser.
pub struct CountingReader<R> {
    inner: R,
    position: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.position += read as u64;
        Ok(read)
    }
}

/// Parse one JSON document from `reader`, driving `sink` with its tokens.
pub fn drive<R: Read, S: JsonEventSink>(reader: R, sink: &mut S) -> Result<()> {
    let mut counting = CountingReader::new(reader);
    let mut failure: Option<StoreError> = None;

    let outcome = {
        let mut de = serde_json::Deserializer::from_reader(&mut counting);
        EventSeed { sink: &mut *sink, failure: &mut failure }
            .deserialize(&mut de)
            .and_then(|()| de.end())
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(err) => {
            let (line, column) = (err.line(), err.column());
            let offset = counting.position();
            match failure.take() {
                Some(sink_error) => Err(sink_error.at_position(offset, line, column)),
                None => Err(StoreError::Parse { offset, line, column, message: err.to_string() }),
            }
        }
    }
}

struct EventSeed<'a, S> {
    sink: &'a mut S,
    failure: &'a mut Option<StoreError>,
}

impl<'a, S> EventSeed<'a, S> {
    fn reborrow(&mut self) -> EventSeed<'_, S> {
        EventSeed { sink: &mut *self.sink, failure: &mut *self.failure }
    }

    fn check<E: de::Error>(&mut self, result: Result<()>) -> std::result::Result<(), E> {
        result.map_err(|err| {
            let message = err.to_string();
            *self.failure = Some(err);
            E::custom(message)
        })
    }
}

impl<'de, 'a, S: JsonEventSink> DeserializeSeed<'de> for EventSeed<'a, S> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de, 'a, S: JsonEventSink> Visitor<'de> for EventSeed<'a, S> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("any JSON value")
    }

    fn visit_bool<E: de::Error>(mut self, v: bool) -> std::result::Result<(), E> {
        let result = self.sink.scalar(Value::Bool(v));
        self.check(result)
    }

    fn visit_i64<E: de::Error>(mut self, v: i64) -> std::result::Result<(), E> {
        let result = self.sink.scalar(Value::from(v));
        self.check(result)
    }

    fn visit_u64<E: de::Error>(mut self, v: u64) -> std::result::Result<(), E> {
        let result = self.sink.scalar(Value::from(v));
        self.check(result)
    }

    fn visit_f64<E: de::Error>(mut self, v: f64) -> std::result::Result<(), E> {
        let result = self.sink.scalar(Value::from(v));
        self.check(result)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<(), E> {
        self.visit_string(v.to_string())
    }

    fn visit_string<E: de::Error>(mut self, v: String) -> std::result::Result<(), E> {
        let result = self.sink.string(v);
        self.check(result)
    }

    fn visit_unit<E: de::Error>(mut self) -> std::result::Result<(), E> {
        let result = self.sink.scalar(Value::Null);
        self.check(result)
    }

    fn visit_seq<A>(mut self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        let result = self.sink.start_array();
        self.check::<A::Error>(result)?;
        while seq.next_element_seed(self.reborrow())?.is_some() {}
        let result = self.sink.end_array();
        self.check(result)
    }

    fn visit_map<A>(mut self, mut map: A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        let result = self.sink.start_object();
        self.check::<A::Error>(result)?;
        while let Some(key) = map.next_key::<String>()? {
            let result = self.sink.key(key);
            self.check::<A::Error>(result)?;
            map.next_value_seed(self.reborrow())?;
        }
        let result = self.sink.end_object();
        self.check(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn push(&mut self, event: String) -> Result<()> {
            if self.fail_on == Some(event.as_str()) {
                return Err(StoreError::parse(format!("rejected {}", event)));
            }
            self.events.push(event);
            Ok(())
        }
    }

    impl JsonEventSink for Recorder {
        fn start_object(&mut self) -> Result<()> {
            self.push("{".into())
        }
        fn key(&mut self, key: String) -> Result<()> {
            self.push(format!("key:{}", key))
        }
        fn end_object(&mut self) -> Result<()> {
            self.push("}".into())
        }
        fn start_array(&mut self) -> Result<()> {
            self.push("[".into())
        }
        fn end_array(&mut self) -> Result<()> {
            self.push("]".into())
        }
        fn string(&mut self, value: String) -> Result<()> {
            self.push(format!("str:{}", value))
        }
        fn scalar(&mut self, value: Value) -> Result<()> {
            self.push(format!("val:{}", value))
        }
    }

    #[test]
    fn test_events_in_document_order() {
        let mut recorder = Recorder::default();
        drive(r#"[{"@id":"a","n":1,"t":[true,null]}]"#.as_bytes(), &mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec!["[", "{", "key:@id", "str:a", "key:n", "val:1", "key:t", "[", "val:true", "val:null", "]", "}", "]"]
        );
    }

    #[test]
    fn test_malformed_input_reports_position() {
        let mut recorder = Recorder::default();
        let err = drive("[{\"@id\":\"a\",\n \"n\": }]".as_bytes(), &mut recorder).unwrap_err();
        match err {
            StoreError::Parse { line, offset, .. } => {
                assert_eq!(line, 2);
                assert!(offset > 10);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_sink_error_is_returned() {
        let mut recorder = Recorder { fail_on: Some("str:bad"), ..Default::default() };
        let err = drive(r#"["ok", "bad", "never"]"#.as_bytes(), &mut recorder).unwrap_err();
        match err {
            StoreError::Parse { message, .. } => assert_eq!(message, "rejected str:bad"),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(recorder.events, vec!["[", "str:ok"]);
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        let mut recorder = Recorder::default();
        assert!(matches!(
            drive("[] x".as_bytes(), &mut recorder),
            Err(StoreError::Parse { .. })
        ));
    }
}
