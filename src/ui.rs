use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Gauge, Paragraph, Widget, Wrap},
};

use mockprep::{
    ledger::PrepPackage,
    machine::{Action, MachineState, SessionView},
    model::EndReason,
    util::format_clock,
};

const HORIZONTAL_MARGIN: u16 = 5;
const VERTICAL_MARGIN: u16 = 1;
const LOW_TIME_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Dictating,
    Code,
}

/// Everything the interview screen draws: the engine's view plus local
/// editing state.
#[derive(Debug, Clone)]
pub struct Screen {
    pub view: SessionView,
    pub mode: InputMode,
    pub draft: String,
    pub status: Option<String>,
    pub question_set: String,
}

impl Screen {
    pub fn new(view: SessionView, question_set: impl Into<String>) -> Self {
        Self {
            view,
            mode: InputMode::Normal,
            draft: String::new(),
            status: None,
            question_set: question_set.into(),
        }
    }

    pub fn hints(&self) -> Vec<(&'static str, &'static str)> {
        match self.mode {
            InputMode::Code => return vec![("esc", "save code"), ("tab", "indent")],
            InputMode::Dictating => {
                return vec![("enter", "send line / stop"), ("tab", "code"), ("esc", "stop")]
            }
            InputMode::Normal => {}
        }

        let mut hints: Vec<_> = self
            .view
            .legal_actions
            .iter()
            .map(|action| match action {
                Action::Start => ("s", "start"),
                Action::ToggleRecording => ("r", "record"),
                Action::EditCode => ("c", "code"),
                Action::Advance if self.view.is_final_question => ("n", "finish"),
                Action::Advance => ("n", "next"),
                Action::End => ("e", "end"),
            })
            .collect();
        if self.view.needs_purchase {
            hints.push(("1-3", "buy"));
        }
        hints.push(("q", "quit"));
        hints
    }

    fn render_bar(&self, area: Rect, buf: &mut Buffer) {
        let bold = Style::default().add_modifier(Modifier::BOLD);
        let dim = Style::default().add_modifier(Modifier::DIM);

        let clock_style = if self.view.state == MachineState::Active
            && self.view.remaining_secs <= LOW_TIME_SECS
        {
            bold.fg(Color::Red)
        } else {
            bold
        };
        let preps = self
            .view
            .balance
            .map_or_else(|| "-".to_string(), |b| b.to_string());

        let mut spans = vec![
            Span::styled("Preps ", dim),
            Span::styled(preps, bold),
            Span::raw("   "),
            Span::styled("Time ", dim),
            Span::styled(format_clock(self.view.remaining_secs), clock_style),
            Span::raw("   "),
            Span::styled(self.question_set.clone(), dim),
        ];
        if self.view.recording {
            spans.push(Span::raw("   "));
            spans.push(Span::styled("● REC", bold.fg(Color::Red)));
        }

        Paragraph::new(Line::from(spans)).render(area, buf);
    }

    fn render_progress(&self, area: Rect, buf: &mut Buffer) {
        let total = self.view.question_total.max(1);
        let number = (self.view.question_index + 1).min(total);

        Gauge::default()
            .gauge_style(Style::default().fg(Color::Cyan))
            .ratio(number as f64 / total as f64)
            .label(format!("Question {number} of {total}"))
            .render(area, buf);
    }

    fn render_idle(&self, area: Rect, buf: &mut Buffer) {
        let bold = Style::default().add_modifier(Modifier::BOLD);

        let mut lines = vec![
            Line::from(Span::styled("Mock interview", bold)),
            Line::default(),
            Line::from(format!(
                "{} questions, {} on the clock.",
                self.view.question_total,
                format_clock(self.view.remaining_secs)
            )),
            Line::from("Starting uses one prep."),
        ];

        if self.view.needs_purchase {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                "You are out of preps. Pick a package:",
                bold.fg(Color::Yellow),
            )));
            for (i, package) in PrepPackage::all().iter().enumerate() {
                lines.push(Line::from(format!(
                    "{}  {:<9} {:>2} preps  {}",
                    i + 1,
                    package.to_string(),
                    package.preps(),
                    package.price_label()
                )));
            }
        }

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .render(area, buf);
    }

    fn render_interview(&self, area: Rect, buf: &mut Buffer) {
        let dim = Style::default().add_modifier(Modifier::DIM);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(3)])
            .split(area);

        let question = &self.view.current_question;
        Paragraph::new(question.prompt.as_str())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!(" {} ", question.kind)),
            )
            .wrap(Wrap { trim: true })
            .render(rows[0], buf);

        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(rows[1]);

        let mut answer = Text::from(self.view.transcript.clone());
        if self.mode == InputMode::Dictating {
            answer.push_line(Line::from(Span::styled(format!("> {}", self.draft), dim)));
        }
        let answer_title = if self.view.recording {
            " Answer (recording) "
        } else {
            " Answer "
        };
        Paragraph::new(answer)
            .block(Block::default().borders(Borders::ALL).title(answer_title))
            .wrap(Wrap { trim: false })
            .render(cols[0], buf);

        let (code, code_title) = if self.mode == InputMode::Code {
            (self.draft.clone(), " Code (editing) ")
        } else {
            (self.view.code.clone().unwrap_or_default(), " Code ")
        };
        Paragraph::new(Text::from(code))
            .block(Block::default().borders(Borders::ALL).title(code_title))
            .render(cols[1], buf);
    }

    fn render_results(&self, area: Rect, buf: &mut Buffer) {
        let bold = Style::default().add_modifier(Modifier::BOLD);
        let outcome = match self.view.end_reason {
            Some(EndReason::Finished) => "You answered every question.",
            Some(EndReason::EndedEarly) => "You ended the interview early.",
            Some(EndReason::TimeExpired) => "Time is up.",
            Some(EndReason::Abandoned) => "The interview was abandoned.",
            None => "Interview over.",
        };
        let preps = self
            .view
            .balance
            .map_or_else(|| "-".to_string(), |b| b.to_string());

        let lines = vec![
            Line::from(Span::styled("Interview complete", bold.fg(Color::Green))),
            Line::default(),
            Line::from(outcome),
            Line::from(format!(
                "Answered {} of {} questions",
                self.view.answered, self.view.question_total
            )),
            Line::from(format!(
                "{} left on the clock",
                format_clock(self.view.remaining_secs)
            )),
            Line::from(format!("{preps} preps remaining")),
        ];

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .render(area, buf);
    }

    fn render_footer(&self, banner_area: Rect, hints_area: Rect, buf: &mut Buffer) {
        let dim = Style::default().add_modifier(Modifier::DIM);
        let bold = Style::default().add_modifier(Modifier::BOLD);

        // engine banners win over local status messages
        let banner = match (&self.view.banner, &self.status) {
            (Some(banner), _) => Some(Span::styled(banner.clone(), bold.fg(Color::Yellow))),
            (None, Some(status)) => Some(Span::styled(status.clone(), dim)),
            (None, None) => None,
        };
        if let Some(span) = banner {
            Paragraph::new(Line::from(span))
                .alignment(Alignment::Center)
                .render(banner_area, buf);
        }

        let spans: Vec<Span> = self
            .hints()
            .into_iter()
            .flat_map(|(key, label)| {
                [
                    Span::styled(key, bold),
                    Span::styled(format!(" {label}   "), dim),
                ]
            })
            .collect();
        Paragraph::new(Line::from(spans))
            .alignment(Alignment::Center)
            .render(hints_area, buf);
    }
}

impl Widget for &Screen {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .horizontal_margin(HORIZONTAL_MARGIN)
            .vertical_margin(VERTICAL_MARGIN)
            .constraints([
                Constraint::Length(1), // preps, clock
                Constraint::Length(1), // progress
                Constraint::Min(3),    // body
                Constraint::Length(1), // banner
                Constraint::Length(1), // key hints
            ])
            .split(area);

        self.render_bar(chunks[0], buf);
        self.render_progress(chunks[1], buf);
        match self.view.state {
            MachineState::Idle => self.render_idle(chunks[2], buf),
            MachineState::Starting => centered("Starting your interview...", chunks[2], buf),
            MachineState::Active => self.render_interview(chunks[2], buf),
            MachineState::Ending => centered("Saving your interview...", chunks[2], buf),
            MachineState::Ended => self.render_results(chunks[2], buf),
        }
        self.render_footer(chunks[3], chunks[4], buf);
    }
}

fn centered(message: &str, area: Rect, buf: &mut Buffer) {
    Paragraph::new(Span::styled(
        message.to_string(),
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD | Modifier::ITALIC),
    ))
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true })
    .render(area, buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockprep::model::{Question, QuestionKind};

    fn view(state: MachineState) -> SessionView {
        SessionView {
            state,
            session_id: None,
            remaining_secs: 1725,
            question_index: 1,
            question_total: 4,
            current_question: Question {
                index: 1,
                prompt: "Reverse a linked list.".to_string(),
                kind: QuestionKind::Technical,
            },
            is_final_question: false,
            recording: false,
            transcript: String::new(),
            code: None,
            answered: 1,
            balance: Some(3),
            legal_actions: match state {
                MachineState::Idle => vec![Action::Start],
                MachineState::Active => vec![
                    Action::ToggleRecording,
                    Action::EditCode,
                    Action::Advance,
                    Action::End,
                ],
                _ => vec![],
            },
            banner: None,
            needs_purchase: false,
            end_reason: None,
        }
    }

    fn rendered(screen: &Screen, width: u16, height: u16) -> String {
        let area = Rect::new(0, 0, width, height);
        let mut buffer = Buffer::empty(area);
        screen.render(area, &mut buffer);
        buffer
            .content()
            .iter()
            .map(|c| c.symbol())
            .collect::<String>()
    }

    #[test]
    fn active_screen_shows_clock_progress_and_prompt() {
        let screen = Screen::new(view(MachineState::Active), "software_engineer");
        let text = rendered(&screen, 100, 30);

        assert!(text.contains("28:45"));
        assert!(text.contains("Question 2 of 4"));
        assert!(text.contains("Reverse a linked list."));
        assert!(text.contains("Technical"));
    }

    #[test]
    fn recording_is_flagged_in_the_bar() {
        let mut v = view(MachineState::Active);
        v.recording = true;
        v.transcript = "I would use two pointers".to_string();
        let mut screen = Screen::new(v, "software_engineer");
        screen.mode = InputMode::Dictating;
        screen.draft = "and swap".to_string();
        let text = rendered(&screen, 100, 30);

        assert!(text.contains("REC"));
        assert!(text.contains("I would use two pointers"));
        assert!(text.contains("> and swap"));
    }

    #[test]
    fn refused_start_lists_packages() {
        let mut v = view(MachineState::Idle);
        v.balance = Some(0);
        v.needs_purchase = true;
        let screen = Screen::new(v, "software_engineer");
        let text = rendered(&screen, 100, 30);

        assert!(text.contains("out of preps"));
        assert!(text.contains("Premium"));
        assert!(text.contains("$34.99"));
        assert!(screen.hints().contains(&("1-3", "buy")));
    }

    #[test]
    fn results_name_the_end_reason() {
        let mut v = view(MachineState::Ended);
        v.end_reason = Some(EndReason::TimeExpired);
        v.remaining_secs = 0;
        let text = rendered(&Screen::new(v, "behavioral"), 100, 30);

        assert!(text.contains("Time is up."));
        assert!(text.contains("Answered 1 of 4 questions"));
    }

    #[test]
    fn banner_wins_over_status() {
        let mut v = view(MachineState::Ending);
        v.banner = Some("Could not reach the server, retrying...".to_string());
        let mut screen = Screen::new(v, "behavioral");
        screen.status = Some("stale".to_string());
        let text = rendered(&screen, 100, 30);

        assert!(text.contains("retrying"));
        assert!(!text.contains("stale"));
    }

    #[test]
    fn hints_follow_legal_actions() {
        let mut v = view(MachineState::Active);
        v.is_final_question = true;
        let hints = Screen::new(v, "x").hints();

        assert!(hints.contains(&("n", "finish")));
        assert!(hints.contains(&("r", "record")));
        assert!(!hints.contains(&("s", "start")));

        let ending = Screen::new(view(MachineState::Ending), "x").hints();
        assert_eq!(ending, vec![("q", "quit")]);
    }

    #[test]
    fn small_area_renders_without_panicking() {
        let screen = Screen::new(view(MachineState::Active), "software_engineer");
        let area = Rect::new(0, 0, 20, 5);
        let mut buffer = Buffer::empty(area);
        (&screen).render(area, &mut buffer);
        assert_eq!(*buffer.area(), area);
    }
}
