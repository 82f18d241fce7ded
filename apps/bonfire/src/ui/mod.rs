//! The terminal widget: a transcript pane, a status line and the
//! nickname/message inputs with connect/close controls. All chat behavior
//! lives in the session controller; this module only routes key events in
//! and applies [`UiEffect`]s coming back out.

use crossterm::event::{Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line as TextLine, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::{Frame, Terminal};
use std::io;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::error::CliError;
use crate::session::controller::{ChatController, SessionEvent};
use crate::session::state::{ConnectionPhase, Controls};
use crate::session::UiEffect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Identity,
    Message,
}

pub struct ChatApp {
    controller: ChatController,
    effects_rx: mpsc::UnboundedReceiver<UiEffect>,
    transcript: Vec<String>,
    phase: ConnectionPhase,
    controls: Controls,
    identity_input: String,
    message_input: String,
    focus: Focus,
    should_quit: bool,
}

enum Tick {
    Input(Event),
    Effect(UiEffect),
    Session(SessionEvent),
    Quit,
}

impl ChatApp {
    pub fn new(
        controller: ChatController,
        effects_rx: mpsc::UnboundedReceiver<UiEffect>,
        nickname_prefill: String,
    ) -> Self {
        Self {
            controller,
            effects_rx,
            transcript: Vec::new(),
            phase: ConnectionPhase::Disconnected,
            controls: Controls::for_phase(ConnectionPhase::Disconnected),
            identity_input: nickname_prefill,
            message_input: String::new(),
            focus: Focus::Identity,
            should_quit: false,
        }
    }

    pub async fn run(mut self) -> Result<(), CliError> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal).await;

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> Result<(), CliError> {
        let (input_tx, mut input_rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            loop {
                match crossterm::event::read() {
                    Ok(event) => {
                        if input_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        loop {
            terminal.draw(|frame| self.render(frame))?;

            let tick = {
                let controller = &mut self.controller;
                let effects_rx = &mut self.effects_rx;
                tokio::select! {
                    maybe = input_rx.recv() => match maybe {
                        Some(event) => Tick::Input(event),
                        None => Tick::Quit,
                    },
                    maybe = effects_rx.recv() => match maybe {
                        Some(effect) => Tick::Effect(effect),
                        None => Tick::Quit,
                    },
                    event = controller.next_event() => Tick::Session(event),
                }
            };
            match tick {
                Tick::Input(event) => self.handle_terminal_event(event),
                Tick::Effect(effect) => self.apply_effect(effect),
                Tick::Session(event) => self.controller.handle_event(event),
                Tick::Quit => self.should_quit = true,
            }

            if self.should_quit {
                return Ok(());
            }
        }
    }

    fn handle_terminal_event(&mut self, event: Event) {
        let Event::Key(key) = event else { return };
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
            }
            KeyCode::Esc => self.controller.close_connection(),
            KeyCode::Tab => self.toggle_focus(),
            KeyCode::Enter => self.submit_focused(),
            KeyCode::Backspace => {
                match self.focus {
                    Focus::Identity => self.identity_input.pop(),
                    Focus::Message => self.message_input.pop(),
                };
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                match self.focus {
                    Focus::Identity => {
                        if self.controls.identity_input {
                            self.identity_input.push(c);
                        }
                    }
                    Focus::Message => self.message_input.push(c),
                }
            }
            _ => {}
        }
    }

    fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            Focus::Identity => Focus::Message,
            Focus::Message if self.controls.identity_input => Focus::Identity,
            Focus::Message => Focus::Message,
        };
    }

    fn submit_focused(&mut self) {
        match self.focus {
            Focus::Identity => {
                // mirrors the disabled connect control
                if !self.controls.connect {
                    return;
                }
                let identity = self.identity_input.clone();
                self.controller.attempt_connect(&identity);
            }
            Focus::Message => {
                if self.message_input.is_empty() {
                    return;
                }
                let text = self.message_input.clone();
                self.controller.send_user_message(&text);
            }
        }
    }

    fn apply_effect(&mut self, effect: UiEffect) {
        match effect {
            UiEffect::Line(text) => {
                self.transcript.push(format!("{} {text}", timestamp()));
            }
            UiEffect::Status(phase) => self.phase = phase,
            UiEffect::Controls(controls) => {
                self.controls = controls;
                self.focus = if controls.identity_input {
                    Focus::Identity
                } else {
                    Focus::Message
                };
            }
            UiEffect::ClearIdentityInput => self.identity_input.clear(),
            UiEffect::ClearMessageInput => self.message_input.clear(),
        }
    }

    fn render(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(3),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Length(1),
            ])
            .split(frame.area());

        let status_color = match self.phase {
            ConnectionPhase::Connected => Color::Green,
            ConnectionPhase::Connecting | ConnectionPhase::Closing => Color::Yellow,
            ConnectionPhase::Disconnected => Color::DarkGray,
        };
        let status = TextLine::from(vec![
            Span::raw("Status: "),
            Span::styled(
                self.phase.to_string(),
                Style::default()
                    .fg(status_color)
                    .add_modifier(Modifier::BOLD),
            ),
        ]);
        frame.render_widget(Paragraph::new(status), chunks[0]);

        let visible = chunks[1].height.saturating_sub(2) as usize;
        let skip = self.transcript.len().saturating_sub(visible);
        let lines: Vec<TextLine> = self.transcript[skip..]
            .iter()
            .map(|line| TextLine::from(line.as_str()))
            .collect();
        let transcript = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("bonfire"));
        frame.render_widget(transcript, chunks[1]);

        let identity = Paragraph::new(self.identity_input.as_str())
            .style(self.input_style(Focus::Identity, self.controls.identity_input))
            .block(Block::default().borders(Borders::ALL).title("Nickname"));
        frame.render_widget(identity, chunks[2]);

        let message = Paragraph::new(self.message_input.as_str())
            .style(self.input_style(Focus::Message, true))
            .block(Block::default().borders(Borders::ALL).title("Message"));
        frame.render_widget(message, chunks[3]);

        let hints = Paragraph::new(
            "Enter: connect/send · Tab: switch input · Esc: close connection · Ctrl-C: quit",
        )
        .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(hints, chunks[4]);
    }

    fn input_style(&self, input: Focus, enabled: bool) -> Style {
        if !enabled {
            Style::default().fg(Color::DarkGray)
        } else if self.focus == input {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        }
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}
