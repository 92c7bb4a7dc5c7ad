mod attachments;
mod config;
mod gemini;
mod markdown;
mod transcript;

use iced::{
    alignment,
    event::{self, Event as IcedEvent},
    keyboard::{self, Key},
    time,
    widget::{
        button, checkbox, column, container, horizontal_space, pick_list, row, scrollable, text,
        text_input, text_input::Id,
    },
    window, Element, Font, Length, Subscription, Task, Theme,
};
use std::sync::Arc;
use std::time::Duration;

use attachments::AttachedFile;
use config::{Config, Settings, SettingsPatch, TextModel, ThemePref, Voice};
use gemini::{GeminiClient, Mode, Reply};
use transcript::{Entry, Sender, Transcript, Turn};

const LOADING_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

fn main() -> iced::Result {
    let config = Config::load();

    iced::application("gembar", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: iced::Size::new(config.window.width as f32, config.window.height as f32),
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(App::new)
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    ReplyOk(Reply),
    ReplyFailed { text: String, invalid_key: bool },
    PickFiles,
    FilesRead(Vec<AttachedFile>),
    RemoveAttachment(usize),
    ModeSelected(Mode),
    ToggleSettings,
    CloseOverlay,
    SystemPromptChanged(String),
    VoiceSelected(Voice),
    ModelSelected(TextModel),
    DarkThemeToggled(bool),
    SendOnEnterToggled(bool),
    ClearTranscript,
    ExportTranscript,
    SaveSnippet { extension: &'static str, code: String },
    Saved(Option<std::path::PathBuf>),
    RecheckKey,
    Tick,
}

struct App {
    input_text: String,
    attachments: Vec<AttachedFile>,
    transcript: Transcript,
    mode: Mode,
    is_processing: bool,
    loading_frame: usize,
    settings: Settings,
    settings_open: bool,
    // `None` means no usable credential: the key screen is shown instead of
    // the chat until one turns up.
    client: Option<Arc<GeminiClient>>,
    input_id: Id,
}

impl App {
    fn new() -> (Self, Task<Message>) {
        let config = Config::load();
        let settings = Settings::load();

        let client = config
            .resolve_api_key()
            .map(|key| Arc::new(GeminiClient::new(config.api.base_url.clone(), key)));
        if client.is_none() {
            eprintln!(
                "No API key found. Set GEMINI_API_KEY or add it to {}",
                Config::get_config_path().display()
            );
        }

        let input_id = Id::unique();
        let app = App {
            input_text: String::new(),
            attachments: Vec::new(),
            transcript: Transcript::default(),
            mode: Mode::Chat,
            is_processing: false,
            loading_frame: 0,
            settings,
            settings_open: false,
            client,
            input_id: input_id.clone(),
        };

        (app, text_input::focus(input_id))
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::Submit => self.submit(),
            Message::ReplyOk(reply) => {
                let mut turn = Turn::gemini(reply.text).with_sources(reply.sources);
                if let Some(image) = reply.image {
                    turn = turn.with_image(image);
                }
                self.transcript.resolve(turn);
                self.is_processing = false;
                Task::none()
            }
            Message::ReplyFailed { text, invalid_key } => {
                self.transcript.resolve(Turn::gemini(text));
                self.is_processing = false;
                if invalid_key {
                    // Force re-authentication: back to the key screen.
                    self.client = None;
                }
                Task::none()
            }
            Message::PickFiles => Task::perform(pick_files(), Message::FilesRead),
            Message::FilesRead(files) => {
                self.attachments.extend(files);
                Task::none()
            }
            Message::RemoveAttachment(index) => {
                if index < self.attachments.len() {
                    self.attachments.remove(index);
                }
                Task::none()
            }
            Message::ModeSelected(mode) => {
                self.mode = mode;
                Task::none()
            }
            Message::ToggleSettings => {
                self.settings_open = !self.settings_open;
                Task::none()
            }
            Message::CloseOverlay => {
                self.settings_open = false;
                Task::none()
            }
            Message::SystemPromptChanged(value) => {
                self.settings.update(SettingsPatch {
                    system_prompt: Some(value),
                    ..Default::default()
                });
                Task::none()
            }
            Message::VoiceSelected(voice) => {
                self.settings.update(SettingsPatch {
                    voice: Some(voice),
                    ..Default::default()
                });
                Task::none()
            }
            Message::ModelSelected(model) => {
                self.settings.update(SettingsPatch {
                    text_model: Some(model),
                    ..Default::default()
                });
                Task::none()
            }
            Message::DarkThemeToggled(dark) => {
                self.settings.update(SettingsPatch {
                    theme: Some(if dark {
                        ThemePref::Dark
                    } else {
                        ThemePref::Light
                    }),
                    ..Default::default()
                });
                Task::none()
            }
            Message::SendOnEnterToggled(enabled) => {
                self.settings.update(SettingsPatch {
                    send_on_enter: Some(enabled),
                    ..Default::default()
                });
                Task::none()
            }
            Message::ClearTranscript => {
                if !self.is_processing {
                    self.transcript.clear();
                }
                Task::none()
            }
            Message::ExportTranscript => {
                if self.transcript.is_empty() {
                    return Task::none();
                }
                let contents = self.transcript.export_text();
                let file_name = transcript::export_file_name();
                Task::perform(save_text(file_name, contents), Message::Saved)
            }
            Message::SaveSnippet { extension, code } => Task::perform(
                save_text(format!("snippet.{}", extension), code),
                Message::Saved,
            ),
            Message::Saved(_) => Task::none(),
            Message::RecheckKey => {
                let config = Config::load();
                if let Some(key) = config.resolve_api_key() {
                    self.client = Some(Arc::new(GeminiClient::new(config.api.base_url, key)));
                }
                Task::none()
            }
            Message::Tick => {
                if self.is_processing {
                    self.loading_frame = (self.loading_frame + 1) % LOADING_FRAMES.len();
                }
                Task::none()
            }
        }
    }

    /// At most one request in flight; a second submit while processing is
    /// dropped.
    fn submit(&mut self) -> Task<Message> {
        if self.is_processing {
            return Task::none();
        }
        if self.input_text.trim().is_empty() && self.attachments.is_empty() {
            return Task::none();
        }
        let Some(client) = self.client.clone() else {
            return Task::none();
        };

        // Snapshot and clear the composer before the call resolves.
        let text = std::mem::take(&mut self.input_text).trim().to_string();
        let files = std::mem::take(&mut self.attachments);
        let file_names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();

        self.transcript.push(Turn::user(text.clone(), file_names));
        self.transcript.begin_pending();
        self.is_processing = true;

        let outgoing = match attachments::build_outgoing(&text, &files) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                self.transcript.resolve(Turn::gemini(format!(
                    "{}. Only PNG, JPEG, WebP, HEIC or HEIF images and text files can be attached.",
                    e
                )));
                self.is_processing = false;
                return text_input::focus(self.input_id.clone());
            }
        };

        let mode = self.mode;
        let settings = self.settings.clone();
        let request = Task::perform(
            async move { client.send(mode, outgoing, &settings).await },
            |result| match result {
                Ok(reply) => Message::ReplyOk(reply),
                Err(e) => Message::ReplyFailed {
                    invalid_key: gemini::is_invalid_key(&e),
                    text: if gemini::is_invalid_key(&e) {
                        "Your API key looks invalid or expired. Enter a valid key to continue."
                            .to_string()
                    } else {
                        format!("Sorry, something went wrong: {:#}", e)
                    },
                },
            },
        );

        Task::batch([request, text_input::focus(self.input_id.clone())])
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.is_processing {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::CloseOverlay)
            } else {
                None
            }
        });

        Subscription::batch([timer, events])
    }

    fn view(&self) -> Element<Message> {
        if self.client.is_none() {
            return self.key_screen();
        }
        if self.settings_open {
            return self.settings_view();
        }

        let content = column![
            self.top_bar(),
            self.transcript_view(),
            self.attachment_chips(),
            self.composer(),
        ]
        .spacing(10)
        .padding(10);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn top_bar(&self) -> Element<Message> {
        let mut modes = row![].spacing(5);
        for mode in Mode::ALL {
            let label = text(mode.label()).size(14);
            let b = if mode == self.mode {
                button(label)
            } else {
                button(label).style(button::secondary)
            };
            modes = modes.push(b.on_press(Message::ModeSelected(mode)).padding(8));
        }

        row![
            modes,
            horizontal_space(),
            button(text("Export").size(14))
                .style(button::secondary)
                .on_press(Message::ExportTranscript)
                .padding(8),
            button(text("Clear").size(14))
                .style(button::secondary)
                .on_press(Message::ClearTranscript)
                .padding(8),
            button(text("Settings").size(14))
                .style(button::secondary)
                .on_press(Message::ToggleSettings)
                .padding(8),
        ]
        .spacing(5)
        .into()
    }

    fn transcript_view(&self) -> Element<Message> {
        let mut entries = column![].spacing(15);

        for entry in self.transcript.entries() {
            match entry {
                Entry::Pending => {
                    entries = entries.push(
                        row![
                            text(LOADING_FRAMES[self.loading_frame]).size(16),
                            text("Gemini is typing…").size(14),
                        ]
                        .spacing(8),
                    );
                }
                Entry::Finalized(turn) => entries = entries.push(self.turn_view(turn)),
            }
        }

        scrollable(container(entries).padding(15).width(Length::Fill))
            .height(Length::Fill)
            .into()
    }

    fn turn_view<'a>(&self, turn: &'a Turn) -> Element<'a, Message> {
        let header = match turn.sender {
            Sender::User => "You",
            Sender::Gemini => "Gemini",
        };
        let mut body = column![text(header).size(12)].spacing(6);

        if !turn.files.is_empty() {
            body = body.push(text(format!("Files: {}", turn.files.join(", "))).size(12));
        }

        match turn.sender {
            Sender::User => {
                body = body.push(text(turn.text.as_str()).size(15));
            }
            Sender::Gemini => {
                for segment in markdown::segment(&turn.text) {
                    body = body.push(match segment {
                        markdown::Segment::Prose(prose) => {
                            Element::from(text(prose).size(15))
                        }
                        markdown::Segment::Code { language, code } => {
                            let extension = markdown::extension_for(&language);
                            let title = if language.is_empty() {
                                "code".to_string()
                            } else {
                                language
                            };
                            container(
                                column![
                                    row![
                                        text(title).size(12),
                                        horizontal_space(),
                                        button(text("Save").size(12))
                                            .style(button::secondary)
                                            .on_press(Message::SaveSnippet {
                                                extension,
                                                code: code.clone(),
                                            })
                                            .padding(5),
                                    ],
                                    text(code).size(14).font(Font::MONOSPACE),
                                ]
                                .spacing(6),
                            )
                            .padding(10)
                            .width(Length::Fill)
                            .style(container::rounded_box)
                            .into()
                        }
                    });
                }
            }
        }

        if let Some(image) = &turn.image {
            body = body.push(
                iced::widget::image(iced::widget::image::Handle::from_bytes(
                    image.bytes.clone(),
                ))
                .width(Length::Fixed(400.0)),
            );
        }

        if !turn.sources.is_empty() {
            let mut sources = column![text("Sources").size(12)].spacing(3);
            for source in &turn.sources {
                sources = sources.push(text(format!("{} — {}", source.title, source.uri)).size(12));
            }
            body = body.push(sources);
        }

        body.into()
    }

    fn attachment_chips(&self) -> Element<Message> {
        let mut chips = row![].spacing(5);
        for (index, file) in self.attachments.iter().enumerate() {
            chips = chips.push(
                button(text(format!("{} ✕", file.name)).size(12))
                    .style(button::secondary)
                    .on_press(Message::RemoveAttachment(index))
                    .padding(5),
            );
        }
        chips.into()
    }

    fn composer(&self) -> Element<Message> {
        let mut input = text_input("Message Gemini…", &self.input_text)
            .on_input(Message::InputChanged)
            .padding(12)
            .size(16)
            .id(self.input_id.clone());
        if self.settings.send_on_enter {
            input = input.on_submit(Message::Submit);
        }

        row![
            button(text("+").size(16))
                .style(button::secondary)
                .on_press(Message::PickFiles)
                .padding(12),
            input,
            button(text("Send").size(16))
                .on_press_maybe((!self.is_processing).then_some(Message::Submit))
                .padding(12),
        ]
        .spacing(8)
        .into()
    }

    fn settings_view(&self) -> Element<Message> {
        let content = column![
            text("Settings").size(20),
            text("System prompt").size(13),
            text_input("System prompt", &self.settings.system_prompt)
                .on_input(Message::SystemPromptChanged)
                .padding(10),
            text("Model").size(13),
            pick_list(
                TextModel::ALL,
                Some(self.settings.text_model),
                Message::ModelSelected
            ),
            text("Voice").size(13),
            pick_list(Voice::ALL, Some(self.settings.voice), Message::VoiceSelected),
            checkbox("Dark theme", self.settings.theme == ThemePref::Dark)
                .on_toggle(Message::DarkThemeToggled),
            checkbox("Send on Enter", self.settings.send_on_enter)
                .on_toggle(Message::SendOnEnterToggled),
            button(text("Close").size(14))
                .on_press(Message::CloseOverlay)
                .padding(8),
        ]
        .spacing(12)
        .padding(20)
        .max_width(500);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .into()
    }

    fn key_screen(&self) -> Element<Message> {
        let content = column![
            text("No API key").size(20),
            text("Set the GEMINI_API_KEY environment variable, or put the key in:").size(14),
            text(Config::get_config_path().display().to_string())
                .size(13)
                .font(Font::MONOSPACE),
            button(text("Check again").size(14))
                .on_press(Message::RecheckKey)
                .padding(8),
        ]
        .spacing(12)
        .align_x(alignment::Horizontal::Center);

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .align_y(alignment::Vertical::Center)
            .into()
    }

    fn theme(&self) -> Theme {
        match self.settings.theme {
            ThemePref::Dark => Theme::TokyoNight,
            ThemePref::Light => Theme::Light,
        }
    }
}

async fn pick_files() -> Vec<AttachedFile> {
    let Some(handles) = rfd::AsyncFileDialog::new()
        .set_title("Attach files")
        .pick_files()
        .await
    else {
        return Vec::new();
    };

    let mut files = Vec::new();
    for handle in handles {
        match AttachedFile::read(handle.path()).await {
            Ok(file) => files.push(file),
            Err(e) => eprintln!("Error reading attachment: {:#}", e),
        }
    }
    files
}

async fn save_text(file_name: String, contents: String) -> Option<std::path::PathBuf> {
    let handle = rfd::AsyncFileDialog::new()
        .set_file_name(&file_name)
        .save_file()
        .await?;

    match tokio::fs::write(handle.path(), contents.as_bytes()).await {
        Ok(()) => Some(handle.path().to_path_buf()),
        Err(e) => {
            eprintln!("Error saving {}: {}", handle.path().display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app() -> App {
        App {
            input_text: String::new(),
            attachments: Vec::new(),
            transcript: Transcript::default(),
            mode: Mode::Chat,
            is_processing: false,
            loading_frame: 0,
            settings: Settings::default(),
            settings_open: false,
            client: Some(Arc::new(GeminiClient::new(
                "http://localhost".to_string(),
                "test-key".to_string(),
            ))),
            input_id: Id::unique(),
        }
    }

    fn attachment(name: &str, mime: &str) -> AttachedFile {
        AttachedFile {
            name: name.to_string(),
            mime: mime.to_string(),
            bytes: b"data".to_vec(),
        }
    }

    #[test]
    fn empty_submit_is_a_no_op() {
        let mut app = test_app();
        app.input_text = "   ".to_string();
        let _ = app.update(Message::Submit);

        assert!(app.transcript.is_empty());
        assert!(!app.is_processing);
    }

    #[test]
    fn submit_while_processing_is_dropped() {
        let mut app = test_app();
        app.is_processing = true;
        app.input_text = "hello".to_string();
        let _ = app.update(Message::Submit);

        assert!(app.transcript.is_empty());
        assert_eq!(app.input_text, "hello");
    }

    #[test]
    fn submit_appends_user_entry_and_placeholder() {
        let mut app = test_app();
        app.input_text = "hello".to_string();
        let _ = app.update(Message::Submit);

        assert!(app.is_processing);
        assert!(app.input_text.is_empty());
        assert_eq!(app.transcript.entries().len(), 2);
        assert!(app.transcript.has_pending());
        assert!(matches!(
            &app.transcript.entries()[0],
            Entry::Finalized(turn) if turn.sender == Sender::User && turn.text == "hello"
        ));
    }

    #[test]
    fn unsupported_file_aborts_before_dispatch() {
        let mut app = test_app();
        app.input_text = "look at this".to_string();
        app.attachments = vec![attachment("doc.pdf", "application/pdf")];
        let _ = app.update(Message::Submit);

        assert!(!app.is_processing);
        assert!(!app.transcript.has_pending());
        assert_eq!(app.transcript.entries().len(), 2);
        assert!(matches!(
            app.transcript.entries().last(),
            Some(Entry::Finalized(turn))
                if turn.sender == Sender::Gemini && turn.text.contains("doc.pdf")
        ));
    }

    #[test]
    fn reply_replaces_placeholder() {
        let mut app = test_app();
        app.input_text = "hello".to_string();
        let _ = app.update(Message::Submit);
        let _ = app.update(Message::ReplyOk(Reply {
            text: "hi there".to_string(),
            image: None,
            sources: Vec::new(),
        }));

        assert!(!app.is_processing);
        assert!(!app.transcript.has_pending());
        assert_eq!(app.transcript.entries().len(), 2);
    }

    #[test]
    fn failure_replaces_placeholder_and_keeps_session() {
        let mut app = test_app();
        app.input_text = "hello".to_string();
        let _ = app.update(Message::Submit);
        let _ = app.update(Message::ReplyFailed {
            text: "Sorry, something went wrong".to_string(),
            invalid_key: false,
        });

        assert!(!app.is_processing);
        assert!(!app.transcript.has_pending());
        assert!(app.client.is_some());
    }

    #[test]
    fn invalid_key_failure_revokes_credential() {
        let mut app = test_app();
        app.input_text = "hello".to_string();
        let _ = app.update(Message::Submit);
        let _ = app.update(Message::ReplyFailed {
            text: "bad key".to_string(),
            invalid_key: true,
        });

        assert!(app.client.is_none());
        assert!(!app.transcript.has_pending());
    }

    #[test]
    fn files_alone_are_enough_to_send() {
        let mut app = test_app();
        app.attachments = vec![attachment("notes.txt", "text/plain")];
        let _ = app.update(Message::Submit);

        assert!(app.is_processing);
        assert!(app.attachments.is_empty());
        assert!(matches!(
            &app.transcript.entries()[0],
            Entry::Finalized(turn) if turn.files == vec!["notes.txt".to_string()]
        ));
    }

    #[test]
    fn mode_switch_leaves_transcript_alone() {
        let mut app = test_app();
        app.transcript.push(Turn::user("hi".to_string(), vec![]));
        app.transcript.push(Turn::gemini("hello".to_string()));

        let _ = app.update(Message::ModeSelected(Mode::Image));

        assert_eq!(app.mode, Mode::Image);
        assert_eq!(app.transcript.entries().len(), 2);
        assert_eq!(app.transcript.export_text(), "[user]\nhi\n\n[gemini]\nhello");
    }
}
