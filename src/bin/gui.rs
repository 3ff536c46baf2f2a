use iced::advanced::subscription::{self, EventStream, Hasher, Recipe};
use iced::futures::stream::BoxStream;
use iced::widget::{
    button, column, container, horizontal_rule, horizontal_space, mouse_area, opaque,
    progress_bar, row, scrollable, stack, text, text_input, Space,
};
use iced::{alignment, Alignment, Background, Color, Element, Length, Subscription, Task, Theme};

use crow_client::upload::IMAGE_EXTENSIONS;
use crow_client::{
    CrowClient, Endpoint, Outcome, ProgressMeter, Reply, Request, Session, Settings,
    UploadProgress, UploadRequest,
};
use std::hash::Hash;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy)]
struct Palette {
    bg_base: Color,
    bg_surface: Color,
    bg_elevated: Color,
    bg_hover: Color,
    text_primary: Color,
    text_secondary: Color,
    text_disabled: Color,
    accent: Color,
    accent_hover: Color,
    border: Color,
    error: Color,
}

impl Palette {
    const DARK: Self = Self {
        bg_base: Color::from_rgb(0.12, 0.12, 0.12),
        bg_surface: Color::from_rgb(0.16, 0.16, 0.16),
        bg_elevated: Color::from_rgb(0.20, 0.20, 0.20),
        bg_hover: Color::from_rgb(0.24, 0.24, 0.24),
        text_primary: Color::from_rgb(1.0, 1.0, 1.0),
        text_secondary: Color::from_rgb(0.70, 0.70, 0.70),
        text_disabled: Color::from_rgb(0.45, 0.45, 0.45),
        accent: Color::from_rgb(0.38, 0.56, 0.89),
        accent_hover: Color::from_rgb(0.45, 0.63, 0.95),
        border: Color::from_rgb(0.28, 0.28, 0.28),
        error: Color::from_rgb(0.90, 0.35, 0.35),
    };
}

pub fn main() -> iced::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("crow_client=info,crow_gui=info")),
        )
        .with_target(false)
        .init();

    iced::application("Crow Server Client", CrowGui::update, CrowGui::view)
        .theme(CrowGui::theme)
        .subscription(CrowGui::subscription)
        .window_size((420.0, 600.0))
        .run_with(CrowGui::new)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialog {
    About,
    Config,
}

struct CrowGui {
    settings: Settings,
    client: CrowClient,
    session: Session,
    username: String,
    password: String,
    selected_file: Option<PathBuf>,
    target_folder: String,
    progress: ProgressMeter,
    /// Upload currently streaming through [`UploadRecipe`], keyed by id.
    active_upload: Option<(u64, Request)>,
    log_lines: Vec<String>,
    dialog: Option<Dialog>,
    server_url_draft: String,
}

/// Streams one upload: progress reports while the body is sent, then the reply.
struct UploadRecipe {
    id: u64,
    client: CrowClient,
    request: Request,
}

impl Recipe for UploadRecipe {
    type Output = Message;

    fn hash(&self, state: &mut Hasher) {
        use std::any::TypeId;
        TypeId::of::<Self>().hash(state);
        self.id.hash(state);
    }

    fn stream(self: Box<Self>, _input: EventStream) -> BoxStream<'static, Message> {
        let UploadRecipe {
            id,
            client,
            request,
        } = *self;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<UploadProgress>();

        let upload_stream = async_stream::stream! {
            let handle = tokio::spawn(async move {
                client
                    .send_with_progress(request, move |progress| {
                        let _ = tx.send(progress);
                    })
                    .await
                    .map_err(|e| e.to_string())
            });

            // The sender lives inside the request body, so the channel
            // closes once the upload future has finished.
            while let Some(progress) = rx.recv().await {
                yield Message::UploadProgressed(id, progress);
            }

            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(e.to_string()),
            };
            yield Message::UploadFinished(id, result);
        };

        Box::pin(upload_stream)
    }
}

#[derive(Debug, Clone)]
enum Message {
    UsernameChanged(String),
    PasswordChanged(String),
    LoginPressed,
    BrowsePressed,
    FileSelected(Option<PathBuf>),
    TargetFolderChanged(String),
    UploadPressed,
    UploadProgressed(u64, UploadProgress),
    UploadFinished(u64, Result<Reply, String>),
    ReplyReceived(Result<Reply, String>),
    OpenDialog(Dialog),
    CloseDialog,
    ServerUrlChanged(String),
    SaveServerUrl,
}

impl CrowGui {
    fn new() -> (Self, Task<Message>) {
        let settings = Settings::load();
        let client = CrowClient::new(settings.server_url.clone());
        (
            Self {
                server_url_draft: settings.server_url.clone(),
                settings,
                client,
                session: Session::new(),
                username: "admin".to_string(),
                password: String::new(),
                selected_file: None,
                target_folder: String::new(),
                progress: ProgressMeter::default(),
                active_upload: None,
                log_lines: Vec::new(),
                dialog: None,
            },
            Task::none(),
        )
    }

    fn theme(&self) -> Theme {
        Theme::Dark
    }

    fn colors(&self) -> Palette {
        Palette::DARK
    }

    fn log(&mut self, msg: impl AsRef<str>) {
        for line in msg.as_ref().lines() {
            self.log_lines.push(line.to_string());
        }
    }

    fn can_upload(&self) -> bool {
        self.session.can_upload() && !self.session.is_refreshing() && self.active_upload.is_none()
    }

    fn subscription(&self) -> Subscription<Message> {
        match &self.active_upload {
            Some((id, request)) => subscription::from_recipe(UploadRecipe {
                id: *id,
                client: self.client.clone(),
                request: request.clone(),
            }),
            None => Subscription::none(),
        }
    }

    /// Uploads go through the subscription so progress can be streamed;
    /// everything else is a one-shot task.
    fn send(&mut self, request: Request) -> Task<Message> {
        if request.endpoint() == Endpoint::Upload {
            self.log("Uploading file...");
            self.progress.reset();
            self.active_upload = Some((gen_id(), request));
            return Task::none();
        }

        let client = self.client.clone();
        Task::perform(
            async move { client.send(request).await.map_err(|e| e.to_string()) },
            Message::ReplyReceived,
        )
    }

    fn handle_reply(&mut self, result: Result<Reply, String>) -> Task<Message> {
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                self.progress.reset();
                self.log(format!("Error: {e}"));
                return Task::none();
            }
        };

        let outcome = self.session.dispatch(reply);
        self.log(outcome.to_string());

        match &outcome {
            Outcome::Uploaded { .. } => self.progress.complete(),
            Outcome::Failed { .. } => self.progress.reset(),
            o if o.requires_login() => self.progress.reset(),
            _ => {}
        }

        match outcome.next_request() {
            Some(request) => self.send(request),
            None => Task::none(),
        }
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::UsernameChanged(v) => {
                self.username = v;
                Task::none()
            }
            Message::PasswordChanged(v) => {
                self.password = v;
                Task::none()
            }
            Message::LoginPressed => {
                if self.username.is_empty() || self.password.is_empty() {
                    self.log("Enter username/password.");
                    return Task::none();
                }
                self.log("Logging in...");
                let request = self.session.login(&self.username, &self.password);
                self.send(request)
            }
            Message::BrowsePressed => {
                let start = self.settings.browse_dir();
                Task::perform(
                    async move {
                        rfd::AsyncFileDialog::new()
                            .set_title("Choose image")
                            .set_directory(start)
                            .add_filter("Images", IMAGE_EXTENSIONS)
                            .pick_file()
                            .await
                            .map(|h| h.path().to_path_buf())
                    },
                    Message::FileSelected,
                )
            }
            Message::FileSelected(opt) => {
                if let Some(path) = opt {
                    if let Some(parent) = path.parent() {
                        self.target_folder = parent.display().to_string();
                        self.settings.image_dir = Some(parent.to_path_buf());
                        if let Err(e) = self.settings.save() {
                            tracing::warn!(error = %e, "could not save settings");
                        }
                    }
                    self.selected_file = Some(path);
                }
                self.progress.reset();
                Task::none()
            }
            Message::TargetFolderChanged(v) => {
                self.target_folder = v;
                Task::none()
            }
            Message::UploadPressed => {
                let Some(file) = self.selected_file.clone() else {
                    self.log("Error: No file selected.");
                    return Task::none();
                };
                match self
                    .session
                    .upload(UploadRequest::new(file, self.target_folder.clone()))
                {
                    Ok(request) => self.send(request),
                    Err(e) => {
                        self.log(format!("Error: {e}"));
                        Task::none()
                    }
                }
            }
            Message::UploadProgressed(id, progress) => {
                if self.active_upload.as_ref().is_some_and(|(a, _)| *a == id) {
                    self.progress.update(progress);
                }
                Task::none()
            }
            Message::UploadFinished(id, result) => {
                if !self.active_upload.as_ref().is_some_and(|(a, _)| *a == id) {
                    return Task::none();
                }
                self.active_upload = None;
                self.handle_reply(result)
            }
            Message::ReplyReceived(result) => self.handle_reply(result),
            Message::OpenDialog(dialog) => {
                if dialog == Dialog::Config {
                    self.server_url_draft = self.settings.server_url.clone();
                }
                self.dialog = Some(dialog);
                Task::none()
            }
            Message::CloseDialog => {
                self.dialog = None;
                Task::none()
            }
            Message::ServerUrlChanged(v) => {
                self.server_url_draft = v;
                Task::none()
            }
            Message::SaveServerUrl => {
                if let Err(e) = self.settings.set_server_url(&self.server_url_draft) {
                    self.log(format!("Error: {e}"));
                    return Task::none();
                }
                self.client.set_server_url(self.settings.server_url.clone());
                if let Err(e) = self.settings.save() {
                    self.log(format!("Warning: settings not saved ({e})"));
                }
                self.log(format!("Server URL set to {}", self.settings.server_url));
                self.dialog = None;
                Task::none()
            }
        }
    }

    fn view(&self) -> Element<'_, Message> {
        let colors = self.colors();
        let base = container(
            column![
                self.view_header(),
                horizontal_rule(1),
                self.view_login(),
                self.view_upload(),
                self.view_log(),
                horizontal_rule(1),
                text(format!("v{}", env!("CARGO_PKG_VERSION")))
                    .size(10)
                    .color(colors.text_secondary),
            ]
            .spacing(12)
            .padding(15),
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .style(move |_| container::Style {
            background: Some(colors.bg_base.into()),
            ..Default::default()
        });

        let Some(dialog) = self.dialog else {
            return base.into();
        };
        let content = match dialog {
            Dialog::About => self.view_about(),
            Dialog::Config => self.view_config(),
        };

        stack![
            base,
            mouse_area(
                container(Space::new(Length::Fill, Length::Fill))
                    .width(Length::Fill)
                    .height(Length::Fill)
                    .style(|_| container::Style {
                        background: Some(Color::from_rgba(0.0, 0.0, 0.0, 0.5).into()),
                        ..Default::default()
                    })
            )
            .on_press(Message::CloseDialog),
            container(opaque(content))
                .width(Length::Fill)
                .height(Length::Fill)
                .center_x(Length::Fill)
                .center_y(Length::Fill)
        ]
        .into()
    }

    fn view_header(&self) -> Element<'_, Message> {
        let colors = self.colors();
        row![
            text("Crow Server Client").size(18).color(colors.accent),
            horizontal_space(),
            button(text("Config").size(12))
                .padding([5, 10])
                .style(make_secondary_style(colors))
                .on_press(Message::OpenDialog(Dialog::Config)),
            button(text("About").size(12))
                .padding([5, 10])
                .style(make_secondary_style(colors))
                .on_press(Message::OpenDialog(Dialog::About)),
        ]
        .spacing(6)
        .align_y(Alignment::Center)
        .into()
    }

    fn view_login(&self) -> Element<'_, Message> {
        let colors = self.colors();
        section(
            colors,
            "1. Authentication",
            column![
                text_input("Username", &self.username)
                    .on_input(Message::UsernameChanged)
                    .padding(8)
                    .style(make_input_style(colors)),
                text_input("Password", &self.password)
                    .on_input(Message::PasswordChanged)
                    .on_submit(Message::LoginPressed)
                    .secure(true)
                    .padding(8)
                    .style(make_input_style(colors)),
                button(text("Login").align_x(alignment::Horizontal::Center))
                    .on_press(Message::LoginPressed)
                    .width(Length::Fill)
                    .padding(8)
                    .style(make_primary_style(colors)),
            ]
            .spacing(8)
            .into(),
        )
    }

    fn view_upload(&self) -> Element<'_, Message> {
        let colors = self.colors();
        let file_display = self
            .selected_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        section(
            colors,
            "2. Photo Upload",
            column![
                row![
                    // No on_input: the path only changes through the picker.
                    text_input("Please choose an image file...", &file_display)
                        .padding(8)
                        .style(make_input_style(colors)),
                    button(text("Browse..."))
                        .padding(8)
                        .style(make_secondary_style(colors))
                        .on_press(Message::BrowsePressed),
                ]
                .spacing(6),
                row![
                    text("Target folder (Server):")
                        .size(12)
                        .color(colors.text_secondary),
                    text_input("e.g. holidays/2025 (optional)", &self.target_folder)
                        .on_input(Message::TargetFolderChanged)
                        .padding(8)
                        .style(make_input_style(colors)),
                ]
                .spacing(6)
                .align_y(Alignment::Center),
                button(text("Upload Photo").align_x(alignment::Horizontal::Center))
                    .on_press_maybe(self.can_upload().then_some(Message::UploadPressed))
                    .width(Length::Fill)
                    .padding(8)
                    .style(make_primary_style(colors)),
                row![
                    progress_bar(0.0..=100.0, f32::from(self.progress.value()))
                        .height(10)
                        .style(make_bar_style(colors)),
                    text(format!("{}%", self.progress.value()))
                        .size(11)
                        .color(colors.text_primary),
                ]
                .spacing(8)
                .align_y(Alignment::Center),
            ]
            .spacing(8)
            .into(),
        )
    }

    fn view_log(&self) -> Element<'_, Message> {
        let colors = self.colors();
        let lines: Vec<Element<'_, Message>> = self
            .log_lines
            .iter()
            .map(|line| {
                let color = if line.starts_with("Error") || line.starts_with("Network Error") {
                    colors.error
                } else {
                    colors.text_primary
                };
                text(line.as_str()).size(12).color(color).into()
            })
            .collect();

        container(scrollable(column(lines).spacing(2).padding(8)).height(Length::Fill))
            .height(Length::Fill)
            .width(Length::Fill)
            .style(move |_| container::Style {
                background: Some(colors.bg_surface.into()),
                border: iced::Border {
                    color: colors.border,
                    width: 1.0,
                    radius: 4.0.into(),
                },
                ..Default::default()
            })
            .into()
    }

    fn view_about(&self) -> Element<'_, Message> {
        let colors = self.colors();
        dialog_frame(
            colors,
            column![
                text("Crow Server Client").size(16).color(colors.text_primary),
                Space::with_height(10),
                text(format!(
                    "{} v{}",
                    env!("CARGO_PKG_NAME"),
                    env!("CARGO_PKG_VERSION")
                ))
                .size(12)
                .color(colors.text_secondary),
                text(env!("CARGO_PKG_DESCRIPTION").replace('\n', " "))
                    .size(12)
                    .color(colors.text_secondary),
                text(format!("Copyright (©) {}", env!("CARGO_PKG_AUTHORS")))
                    .size(12)
                    .color(colors.text_secondary),
                Space::with_height(15),
                button(text("Close").align_x(alignment::Horizontal::Center))
                    .padding([8, 20])
                    .style(make_secondary_style(colors))
                    .on_press(Message::CloseDialog),
            ]
            .into(),
        )
    }

    fn view_config(&self) -> Element<'_, Message> {
        let colors = self.colors();
        dialog_frame(
            colors,
            column![
                text("Server URL").size(16).color(colors.text_primary),
                Space::with_height(10),
                text("Please enter the new Server URL")
                    .size(12)
                    .color(colors.text_secondary),
                text_input(crow_client::DEFAULT_SERVER_URL, &self.server_url_draft)
                    .on_input(Message::ServerUrlChanged)
                    .on_submit(Message::SaveServerUrl)
                    .padding(10)
                    .style(make_input_style(colors)),
                Space::with_height(15),
                row![
                    button(text("Cancel").align_x(alignment::Horizontal::Center))
                        .padding([8, 20])
                        .style(make_secondary_style(colors))
                        .on_press(Message::CloseDialog),
                    Space::with_width(10),
                    button(text("Save").align_x(alignment::Horizontal::Center))
                        .padding([8, 20])
                        .style(make_primary_style(colors))
                        .on_press(Message::SaveServerUrl),
                ]
            ]
            .spacing(4)
            .into(),
        )
    }
}

fn gen_id() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

fn section<'a>(
    colors: Palette,
    title: &'a str,
    content: Element<'a, Message>,
) -> Element<'a, Message> {
    container(
        column![
            text(title).size(13).color(colors.text_secondary),
            content
        ]
        .spacing(8),
    )
    .padding(12)
    .width(Length::Fill)
    .style(move |_| container::Style {
        background: Some(colors.bg_surface.into()),
        border: iced::Border {
            color: colors.border,
            width: 1.0,
            radius: 6.0.into(),
        },
        ..Default::default()
    })
    .into()
}

fn dialog_frame(colors: Palette, content: Element<'_, Message>) -> Element<'_, Message> {
    container(container(content).padding(20).width(320))
        .style(move |_| container::Style {
            background: Some(colors.bg_elevated.into()),
            border: iced::Border {
                color: colors.border,
                width: 1.0,
                radius: 8.0.into(),
            },
            shadow: iced::Shadow {
                color: Color::from_rgba(0.0, 0.0, 0.0, 0.3),
                offset: iced::Vector::new(0.0, 4.0),
                blur_radius: 12.0,
            },
            ..Default::default()
        })
        .into()
}

// ============================================================================
// Theme-aware style functions
// ============================================================================

fn make_input_style(colors: Palette) -> impl Fn(&Theme, text_input::Status) -> text_input::Style {
    move |_, status| text_input::Style {
        background: Background::Color(if status == text_input::Status::Disabled {
            colors.bg_elevated
        } else {
            colors.bg_surface
        }),
        border: iced::Border {
            color: colors.border,
            width: 1.0,
            radius: 4.0.into(),
        },
        icon: colors.text_primary,
        placeholder: colors.text_disabled,
        value: colors.text_primary,
        selection: colors.accent,
    }
}

fn make_primary_style(colors: Palette) -> impl Fn(&Theme, button::Status) -> button::Style {
    move |_, s| {
        let base = button::Style {
            background: Some(colors.accent.into()),
            text_color: Color::WHITE,
            border: iced::Border {
                radius: 4.0.into(),
                ..Default::default()
            },
            ..Default::default()
        };
        match s {
            button::Status::Hovered => button::Style {
                background: Some(colors.accent_hover.into()),
                ..base
            },
            button::Status::Disabled => button::Style {
                background: Some(colors.bg_elevated.into()),
                text_color: colors.text_disabled,
                ..base
            },
            _ => base,
        }
    }
}

fn make_secondary_style(colors: Palette) -> impl Fn(&Theme, button::Status) -> button::Style {
    move |_, s| {
        let base = button::Style {
            background: Some(colors.bg_elevated.into()),
            text_color: colors.text_primary,
            border: iced::Border {
                color: colors.border,
                width: 1.0,
                radius: 4.0.into(),
            },
            ..Default::default()
        };
        match s {
            button::Status::Hovered => button::Style {
                background: Some(colors.bg_hover.into()),
                ..base
            },
            _ => base,
        }
    }
}

fn make_bar_style(colors: Palette) -> impl Fn(&Theme) -> progress_bar::Style {
    move |_| progress_bar::Style {
        background: Background::Color(colors.bg_elevated),
        bar: Background::Color(colors.accent),
        border: iced::Border {
            radius: 2.0.into(),
            ..Default::default()
        },
    }
}
