use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{render_error, CallDirective, ResponseBuilder};
use crate::errors::DirectiveError;

/// Twilio/Plivo-style XML.
#[derive(Clone, Copy, Debug, Default)]
pub struct TwimlBuilder;

impl TwimlBuilder {
    fn document(
        &self,
        body: impl FnOnce(&mut Writer<Cursor<Vec<u8>>>) -> Result<(), DirectiveError>,
    ) -> Result<String, DirectiveError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(render_error)?;
        writer
            .write_event(Event::Start(BytesStart::new("Response")))
            .map_err(render_error)?;
        body(&mut writer)?;
        writer.write_event(Event::End(BytesEnd::new("Response"))).map_err(render_error)?;

        String::from_utf8(writer.into_inner().into_inner()).map_err(render_error)
    }
}

impl ResponseBuilder for TwimlBuilder {
    fn content_type(&self) -> &'static str {
        "application/xml"
    }

    fn render(&self, directive: &CallDirective) -> Result<String, DirectiveError> {
        directive.validate()?;

        match directive {
            CallDirective::PlayThenRecord { audio_url, callback_url, status_url, max_seconds } => {
                let max_length = max_seconds.to_string();
                self.document(|writer| {
                    write_play(writer, audio_url)?;
                    writer
                        .create_element("Record")
                        .with_attribute(("maxLength", max_length.as_str()))
                        .with_attribute(("action", callback_url.as_str()))
                        .with_attribute(("method", "POST"))
                        .with_attribute(("recordingStatusCallback", status_url.as_str()))
                        .with_attribute(("playBeep", "true"))
                        .with_attribute(("finishOnKey", "#"))
                        .with_attribute(("timeout", "5"))
                        .write_empty()
                        .map_err(render_error)?;
                    Ok(())
                })
            }
            CallDirective::PlayThenHangup { audio_url } => self.document(|writer| {
                write_play(writer, audio_url)?;
                write_hangup(writer)
            }),
            CallDirective::SayThenHangup { text } => self.document(|writer| {
                writer
                    .create_element("Say")
                    .write_text_content(BytesText::new(text))
                    .map_err(render_error)?;
                write_hangup(writer)
            }),
        }
    }

    fn empty(&self) -> String {
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>".to_string()
    }
}

fn write_play(writer: &mut Writer<Cursor<Vec<u8>>>, url: &str) -> Result<(), DirectiveError> {
    writer.create_element("Play").write_text_content(BytesText::new(url)).map_err(render_error)?;
    Ok(())
}

fn write_hangup(writer: &mut Writer<Cursor<Vec<u8>>>) -> Result<(), DirectiveError> {
    writer.create_element("Hangup").write_empty().map_err(render_error)?;
    Ok(())
}
