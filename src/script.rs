//! Choreography script text: token vocabulary and the token-stream parser
//! that assembles a [`Script`].
//!
//! The grammar is line-oriented: `KITES <n>`, then `BEGIN` ... `END` with
//! one action per line (`VERB (id id ...) args... duration`), optionally
//! grouped in `{ }` to form one concurrent block. All build-time
//! diagnostics live here; a failed parse constructs no frames.

use glam::Vec2;
use thiserror::Error;

use crate::action::Action;
use crate::frame::{Block, BuildError, Frame, Script, Track};
use crate::kite::{KiteId, Tip};

/// Diagnostics for a malformed script source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("line {line}: unknown word '{word}'")]
    UnknownWord { line: usize, word: String },

    #[error("line {line}: '{word}' is not a number")]
    BadNumber { line: usize, word: String },

    #[error("expected {expected}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
    },

    #[error("unexpected end of script")]
    UnexpectedEnd,

    #[error("script must open with KITES <n>")]
    MissingKites,

    #[error("missing BEGIN")]
    MissingBegin,

    #[error("missing END")]
    MissingEnd,

    #[error("unterminated {{ block")]
    UnterminatedBrace,

    #[error("kite id {id} out of range (script declares {count} kites)")]
    KiteOutOfRange { id: u32, count: u32 },

    #[error("kite id must be a non-negative integer, got {value}")]
    NonIntegerKite { value: f32 },

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// The action verbs of the script grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Move,
    MoveAdd,
    Rotate,
    RotateAdd,
    TipRotate,
    TipRotateAdd,
    Wait,
    Quit,
}

/// One token of the choreography grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Kites,
    Begin,
    End,
    OpenBrace,
    CloseBrace,
    OpenParen,
    CloseParen,
    Verb(Verb),
    TipSel(Tip),
    Number(f32),
}

/// Split source text into tokens. `#` starts a comment running to the end
/// of the line; braces and parentheses need no surrounding whitespace.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    for (lineno, raw) in src.lines().enumerate() {
        let line = lineno + 1;
        let text = raw.split('#').next().unwrap_or("");
        let spaced = text
            .replace('(', " ( ")
            .replace(')', " ) ")
            .replace('{', " { ")
            .replace('}', " } ");
        for word in spaced.split_whitespace() {
            let token = match word {
                "KITES" => Token::Kites,
                "BEGIN" => Token::Begin,
                "END" => Token::End,
                "{" => Token::OpenBrace,
                "}" => Token::CloseBrace,
                "(" => Token::OpenParen,
                ")" => Token::CloseParen,
                "MOVE" => Token::Verb(Verb::Move),
                "MOVEADD" => Token::Verb(Verb::MoveAdd),
                "ROTATE" => Token::Verb(Verb::Rotate),
                "ROTATEADD" => Token::Verb(Verb::RotateAdd),
                "TIPROTATE" => Token::Verb(Verb::TipRotate),
                "TIPROTATEADD" => Token::Verb(Verb::TipRotateAdd),
                "WAIT" => Token::Verb(Verb::Wait),
                "QUIT" => Token::Verb(Verb::Quit),
                "L" => Token::TipSel(Tip::Left),
                "R" => Token::TipSel(Tip::Right),
                _ => match word.parse::<f32>() {
                    Ok(v) => Token::Number(v),
                    Err(_) if word.chars().any(|c| c.is_ascii_digit()) => {
                        return Err(ParseError::BadNumber {
                            line,
                            word: word.to_string(),
                        })
                    }
                    Err(_) => {
                        return Err(ParseError::UnknownWord {
                            line,
                            word: word.to_string(),
                        })
                    }
                },
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}

/// The result of parsing: the script plus the declared kite count.
#[derive(Debug, Clone)]
pub struct ParsedScript {
    pub script: Script,
    pub kite_count: u32,
}

/// Assemble a script from an already-tokenized instruction stream.
pub fn parse(tokens: &[Token], script_id: u32) -> Result<ParsedScript, ParseError> {
    let mut p = Parser { tokens, pos: 0 };

    if !matches!(p.next(), Some(Token::Kites)) {
        return Err(ParseError::MissingKites);
    }
    let declared = p.number("kite count")?;
    if declared.fract() != 0.0 || declared < 1.0 {
        return Err(ParseError::MissingKites);
    }
    let kite_count = declared as u32;

    if !matches!(p.next(), Some(Token::Begin)) {
        return Err(ParseError::MissingBegin);
    }

    let mut blocks = Vec::new();
    loop {
        match p.peek() {
            None => return Err(ParseError::MissingEnd),
            Some(Token::End) => {
                p.next();
                break;
            }
            Some(Token::OpenBrace) => {
                p.next();
                let mut tracks = Vec::new();
                loop {
                    match p.peek() {
                        None => return Err(ParseError::UnterminatedBrace),
                        Some(Token::CloseBrace) => {
                            p.next();
                            break;
                        }
                        Some(Token::Verb(_)) => {
                            let frame = parse_action_line(&mut p, kite_count)?;
                            tracks.push(Track::new(vec![frame]));
                        }
                        Some(other) => {
                            return Err(ParseError::Unexpected {
                                expected: "action line or '}'",
                                found: format!("{:?}", other),
                            })
                        }
                    }
                }
                blocks.push(Block::new(tracks)?);
            }
            Some(Token::Verb(_)) => {
                let frame = parse_action_line(&mut p, kite_count)?;
                blocks.push(Block::new(vec![Track::new(vec![frame])])?);
            }
            Some(other) => {
                return Err(ParseError::Unexpected {
                    expected: "action line, '{', or END",
                    found: format!("{:?}", other),
                })
            }
        }
    }

    Ok(ParsedScript {
        script: Script::new(script_id, blocks),
        kite_count,
    })
}

/// Tokenize and parse in one step.
pub fn load_source(src: &str, script_id: u32) -> Result<ParsedScript, ParseError> {
    let tokens = tokenize(src)?;
    parse(&tokens, script_id)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn number(&mut self, expected: &'static str) -> Result<f32, ParseError> {
        match self.next() {
            Some(Token::Number(v)) => Ok(*v),
            Some(other) => Err(ParseError::Unexpected {
                expected,
                found: format!("{:?}", other),
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn tip(&mut self) -> Result<Tip, ParseError> {
        match self.next() {
            Some(Token::TipSel(t)) => Ok(*t),
            Some(other) => Err(ParseError::Unexpected {
                expected: "tip selector L or R",
                found: format!("{:?}", other),
            }),
            None => Err(ParseError::UnexpectedEnd),
        }
    }
}

/// `VERB (id id ...) args... duration`
fn parse_action_line(p: &mut Parser, kite_count: u32) -> Result<Frame, ParseError> {
    let verb = match p.next() {
        Some(Token::Verb(v)) => *v,
        _ => unreachable!("caller peeked a verb"),
    };

    match p.next() {
        Some(Token::OpenParen) => {}
        Some(other) => {
            return Err(ParseError::Unexpected {
                expected: "'(' opening the kite id list",
                found: format!("{:?}", other),
            })
        }
        None => return Err(ParseError::UnexpectedEnd),
    }

    let mut kite_ids = Vec::new();
    loop {
        match p.next() {
            Some(Token::CloseParen) => break,
            Some(Token::Number(v)) => {
                if v.fract() != 0.0 || *v < 0.0 {
                    return Err(ParseError::NonIntegerKite { value: *v });
                }
                let id = *v as u32;
                if id >= kite_count {
                    return Err(ParseError::KiteOutOfRange {
                        id,
                        count: kite_count,
                    });
                }
                kite_ids.push(KiteId(id));
            }
            Some(other) => {
                return Err(ParseError::Unexpected {
                    expected: "kite id or ')'",
                    found: format!("{:?}", other),
                })
            }
            None => return Err(ParseError::UnexpectedEnd),
        }
    }

    let action = match verb {
        Verb::Move => {
            let x = p.number("x coordinate")?;
            let y = p.number("y coordinate")?;
            Action::Move(Vec2::new(x, y))
        }
        Verb::MoveAdd => {
            let x = p.number("x delta")?;
            let y = p.number("y delta")?;
            Action::MoveAdd(Vec2::new(x, y))
        }
        Verb::Rotate => Action::Rotation(p.number("angle")?),
        Verb::RotateAdd => Action::RotationAdd(p.number("angle delta")?),
        Verb::TipRotate => {
            let tip = p.tip()?;
            Action::TipRotation(tip, p.number("angle")?)
        }
        Verb::TipRotateAdd => {
            let tip = p.tip()?;
            Action::TipRotationAdd(tip, p.number("angle delta")?)
        }
        Verb::Wait => Action::Wait,
        Verb::Quit => Action::Quit,
    };

    let duration = p.number("duration")?;
    Ok(Frame::new(action, kite_ids, duration)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = "\
# two kites, three blocks
KITES 2
BEGIN
MOVE (0 1) 100 50 2.0
{
    ROTATE (0) 90 1.0
    TIPROTATEADD (1) R 180 1.5
}
WAIT (0 1) 0.5
END
";

    #[test]
    fn test_tokenize_demo() {
        let tokens = tokenize(DEMO).unwrap();
        assert_eq!(tokens[0], Token::Kites);
        assert_eq!(tokens[1], Token::Number(2.0));
        assert!(tokens.contains(&Token::OpenBrace));
        assert!(tokens.contains(&Token::TipSel(Tip::Right)));
        assert_eq!(*tokens.last().unwrap(), Token::End);
    }

    #[test]
    fn test_parse_demo() {
        let parsed = load_source(DEMO, 3).unwrap();
        assert_eq!(parsed.kite_count, 2);
        assert_eq!(parsed.script.id, 3);
        assert_eq!(parsed.script.block_count(), 3);

        // The brace group became one block with two concurrent tracks.
        let script = parsed.script;
        let blocks: Vec<_> = (0..script.block_count()).collect();
        assert_eq!(blocks.len(), 3);
    }

    #[test]
    fn test_move_line_payload() {
        let parsed = load_source("KITES 1\nBEGIN\nMOVE (0) 10 20 1.5\nEND\n", 0).unwrap();
        let script = parsed.script;
        let block = script.current_block().unwrap();
        let frame = &block.tracks()[0].frames()[0];
        assert_eq!(frame.action, Action::Move(Vec2::new(10.0, 20.0)));
        assert!((frame.duration - 1.5).abs() < 0.001);
        assert_eq!(frame.kite_ids, vec![KiteId(0)]);
    }

    #[test]
    fn test_unknown_word() {
        let err = tokenize("KITES 1\nBEGIN\nFLY (0) 1.0\nEND\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownWord {
                line: 3,
                word: "FLY".to_string()
            }
        );
    }

    #[test]
    fn test_kite_out_of_range() {
        let err = load_source("KITES 2\nBEGIN\nWAIT (5) 1.0\nEND\n", 0).unwrap_err();
        assert_eq!(err, ParseError::KiteOutOfRange { id: 5, count: 2 });
    }

    #[test]
    fn test_unterminated_brace() {
        let err = load_source("KITES 1\nBEGIN\n{\nWAIT (0) 1.0\nEND\n", 0).unwrap_err();
        // END inside an open brace group is not a valid track line.
        assert!(matches!(
            err,
            ParseError::Unexpected { .. } | ParseError::UnterminatedBrace
        ));
    }

    #[test]
    fn test_missing_end() {
        let err = load_source("KITES 1\nBEGIN\nWAIT (0) 1.0\n", 0).unwrap_err();
        assert_eq!(err, ParseError::MissingEnd);
    }

    #[test]
    fn test_empty_kite_list_rejected() {
        let err = load_source("KITES 1\nBEGIN\nWAIT ( ) 1.0\nEND\n", 0).unwrap_err();
        assert_eq!(err, ParseError::Build(BuildError::EmptyKiteSet));
    }

    #[test]
    fn test_duplicate_kite_in_block_rejected() {
        let src = "KITES 2\nBEGIN\n{\nMOVE (0) 1 1 1.0\nROTATE (0) 90 1.0\n}\nEND\n";
        let err = load_source(src, 0).unwrap_err();
        assert_eq!(err, ParseError::Build(BuildError::DuplicateKite(KiteId(0))));
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let src = "# header\nKITES 1\n\nBEGIN # inline\nQUIT (0) 0\nEND\n";
        let parsed = load_source(src, 0).unwrap();
        assert_eq!(parsed.script.block_count(), 1);
    }
}
