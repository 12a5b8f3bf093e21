use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{error, info, warn};
use rand::Rng;
use ratatui::{prelude::*, widgets::*};
use simplelog::{Config, LevelFilter, WriteLogger};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Stdout};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const GRID_WIDTH: u16 = 15;
const GRID_HEIGHT: u16 = 15;

// Reaching this length ends the game on the spot. Looks like a leftover
// test shortcut, but it is the rule: keep it a named constant, not magic.
const EARLY_WIN_LENGTH: usize = 4;

// How long each turn waits for a keypress before the snake slides on.
const INPUT_TIMEOUT: Duration = Duration::from_millis(200);

const HEAD_GLYPH: &str = "@@";
const BODY_GLYPH: &str = "==";
const FOOD_GLYPH: &str = "##";
const EMPTY_GLYPH: &str = "  ";

const START_PROMPT: &str = "== Press w/a/s/d to start ==";
const MOVE_PROMPT: &str = "== Press w/a/s/d to move ==";

const CELEBRATION_URL: &str = "https://www.youtube.com/watch?v=UR7tujNjfo4";
const LOG_FILE: &str = "slither.log";

#[derive(Debug, Error)]
enum AppError {
    #[error("grid dimensions must be odd, got {width}x{height}")]
    EvenDimensions { width: u16, height: u16 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn main() -> Result<(), AppError> {
    // Set up logging before anything else; stdout belongs to the game
    WriteLogger::init(
        LevelFilter::Info,
        Config::default(),
        File::create(LOG_FILE)?,
    )
    .expect("Failed to initialize logger");

    info!("Starting slither");

    let mut rng = rand::thread_rng();
    let mut game = Game::new(GRID_WIDTH, GRID_HEIGHT, &mut rng)?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let input = spawn_listener();

    terminal.draw(|f| game.render(f, START_PROMPT))?;

    let ending = play(&mut game, &input, &mut terminal, &mut rng);

    // Cleanup terminal before printing anything
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    match ending? {
        GameEnd::Quit => info!("player quit at length {}", game.snake.length()),
        GameEnd::Lost => {
            info!("lost at length {}", game.snake.length());
            println!("Game over, you failed ...");
        }
        GameEnd::Won => {
            info!("board filled, full win");
            println!("You win !!");
        }
        GameEnd::WonEarly => {
            info!("hit the milestone length, opening the celebration page");
            println!("You win !!");
            if let Err(e) = webbrowser::open(CELEBRATION_URL) {
                warn!("could not open celebration page: {}", e);
            }
        }
    }

    println!("Thanks for playing!");
    Ok(())
}

// One whole round, from the first keypress to whatever ends it.
fn play(
    game: &mut Game,
    input: &InputSlot,
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    rng: &mut impl Rng,
) -> Result<GameEnd, AppError> {
    let mut direction = match input.wait() {
        Command::Quit => return Ok(GameEnd::Quit),
        Command::Steer(direction) => direction,
    };
    info!("first direction: {:?}", direction);

    loop {
        let outcome = game.turn(direction, rng);
        terminal.draw(|f| game.render(f, MOVE_PROMPT))?;

        match outcome {
            TurnOutcome::Running => {}
            TurnOutcome::Lost => return Ok(GameEnd::Lost),
            TurnOutcome::Won => return Ok(GameEnd::Won),
            TurnOutcome::WonEarly => return Ok(GameEnd::WonEarly),
        }

        // No key within the window: the snake keeps going on its own
        direction = match input.wait_timeout(INPUT_TIMEOUT) {
            Some(Command::Quit) => return Ok(GameEnd::Quit),
            Some(Command::Steer(new_direction)) => new_direction,
            None => direction,
        };
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    fn opposite(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    fn delta(&self) -> (i16, i16) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    fn from_key(key: char) -> Option<Direction> {
        match key {
            'w' => Some(Direction::Up),
            'a' => Some(Direction::Left),
            's' => Some(Direction::Down),
            'd' => Some(Direction::Right),
            _ => None,
        }
    }
}

// Signed so that one step past the edge is still representable; the
// boundary check runs on these before anything touches the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pos {
    x: i16,
    y: i16,
}

impl Pos {
    fn step(&self, direction: Direction) -> Pos {
        let (dx, dy) = direction.delta();
        Pos {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tile {
    Head,
    Body,
    Food,
}

impl Tile {
    fn glyph(&self) -> &'static str {
        match self {
            Tile::Head => HEAD_GLYPH,
            Tile::Body => BODY_GLYPH,
            Tile::Food => FOOD_GLYPH,
        }
    }
}

// Cell buffer the renderer projects from. At most one tile per cell:
// movement clears a cell before anything else is placed into it.
#[derive(Debug)]
struct Board {
    width: u16,
    height: u16,
    cells: Vec<Option<Tile>>,
}

impl Board {
    fn new(width: u16, height: u16) -> Board {
        Board {
            width,
            height,
            cells: vec![None; width as usize * height as usize],
        }
    }

    fn contains(&self, pos: Pos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.width as i16 && pos.y < self.height as i16
    }

    fn index(&self, pos: Pos) -> usize {
        debug_assert!(self.contains(pos), "cell out of bounds: {:?}", pos);
        self.width as usize * pos.y as usize + pos.x as usize
    }

    fn tile(&self, pos: Pos) -> Option<Tile> {
        self.cells[self.index(pos)]
    }

    fn place(&mut self, pos: Pos, tile: Tile) {
        let index = self.index(pos);
        self.cells[index] = Some(tile);
    }

    fn clear(&mut self, pos: Pos) {
        let index = self.index(pos);
        self.cells[index] = None;
    }

    fn render(&self) -> String {
        let border = format!("+{}+", "-".repeat(self.width as usize * 2));
        let mut frame = String::new();
        frame.push_str(&border);
        frame.push('\n');
        for y in 0..self.height {
            frame.push('|');
            for x in 0..self.width {
                let glyph = match self.tile(Pos {
                    x: x as i16,
                    y: y as i16,
                }) {
                    Some(tile) => tile.glyph(),
                    None => EMPTY_GLYPH,
                };
                frame.push_str(glyph);
            }
            frame.push_str("|\n");
        }
        frame.push_str(&border);
        frame
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StepResult {
    Blocked, // ran into its own body, nothing moved
    Moved,
    Ate,
}

// Body runs head-to-tail and does not include the head cell.
// Invariant: length == 1 + body.len().
#[derive(Debug)]
struct Snake {
    head: Pos,
    body: VecDeque<Pos>,
    length: usize,
}

impl Snake {
    fn new(head: Pos, board: &mut Board) -> Snake {
        board.place(head, Tile::Head);
        Snake {
            head,
            body: VecDeque::new(),
            length: 1,
        }
    }

    fn length(&self) -> usize {
        self.length
    }

    fn occupies(&self, pos: Pos) -> bool {
        self.head == pos || self.body.contains(&pos)
    }

    // The wall check is the caller's job; this only knows about the body.
    fn advance(&mut self, direction: Direction, food: Option<Pos>, board: &mut Board) -> StepResult {
        let candidate = self.head.step(direction);

        // Scan before the head moves, while its old cell is still its own
        if self.body.contains(&candidate) {
            return StepResult::Blocked;
        }

        let old_head = self.head;
        board.clear(old_head);
        self.head = candidate;
        board.place(self.head, Tile::Head);

        if food == Some(self.head) {
            // A brand-new segment fills the cell the head just left;
            // nothing else shifts
            self.body.push_front(old_head);
            board.place(old_head, Tile::Body);
            self.length += 1;
            return StepResult::Ate;
        }

        // Tail follow: the tail teleports to just behind the head,
        // which moves the whole snake in O(1)
        match self.body.pop_back() {
            None => StepResult::Moved,
            Some(tail) => {
                board.clear(tail);
                self.body.push_front(old_head);
                board.place(old_head, Tile::Body);
                StepResult::Moved
            }
        }
    }
}

// Picks a free cell by rejection sampling, or reports a full board.
// Occupancy is below width*height whenever the loop runs, so it ends.
fn spawn_food(rng: &mut impl Rng, width: u16, height: u16, snake: &Snake) -> Option<Pos> {
    if snake.length() >= width as usize * height as usize {
        return None;
    }
    loop {
        let pos = Pos {
            x: rng.gen_range(0..width as i16),
            y: rng.gen_range(0..height as i16),
        };
        if !snake.occupies(pos) {
            return Some(pos);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TurnOutcome {
    Running,
    Lost,
    Won,
    WonEarly,
}

struct Game {
    width: u16,
    height: u16,
    board: Board,
    snake: Snake,
    food: Option<Pos>,
    direction: Option<Direction>, // unset until the first keypress
}

impl Game {
    fn new(width: u16, height: u16, rng: &mut impl Rng) -> Result<Game, AppError> {
        if width % 2 == 0 || height % 2 == 0 {
            return Err(AppError::EvenDimensions { width, height });
        }

        let mut board = Board::new(width, height);
        let snake = Snake::new(
            Pos {
                x: width as i16 / 2,
                y: height as i16 / 2,
            },
            &mut board,
        );

        let food = spawn_food(rng, width, height, &snake);
        if let Some(pos) = food {
            board.place(pos, Tile::Food);
        }

        info!("new {}x{} game, head at {:?}", width, height, snake.head);

        Ok(Game {
            width,
            height,
            board,
            snake,
            food,
            direction: None,
        })
    }

    fn turn(&mut self, requested: Direction, rng: &mut impl Rng) -> TurnOutcome {
        // A reversal keystroke would drive the head straight into the
        // first body segment; treat it as "keep going"
        let direction = match self.direction {
            Some(current) if requested == current.opposite() => current,
            _ => requested,
        };
        self.direction = Some(direction);

        let next = self.snake.head.step(direction);
        if !self.board.contains(next) {
            info!("hit the wall at {:?}", next);
            return TurnOutcome::Lost;
        }

        match self.snake.advance(direction, self.food, &mut self.board) {
            StepResult::Blocked => {
                info!("ran into own body at {:?}", next);
                TurnOutcome::Lost
            }
            StepResult::Moved => TurnOutcome::Running,
            StepResult::Ate => {
                self.food = None;
                if self.snake.length() == EARLY_WIN_LENGTH {
                    return TurnOutcome::WonEarly;
                }
                match spawn_food(rng, self.width, self.height, &self.snake) {
                    None => TurnOutcome::Won,
                    Some(pos) => {
                        self.board.place(pos, Tile::Food);
                        self.food = Some(pos);
                        info!("food spawned at {:?}", pos);
                        TurnOutcome::Running
                    }
                }
            }
        }
    }

    fn render(&self, frame: &mut Frame, prompt: &str) {
        let status = format!("SLITHER    length: {}    {}", self.snake.length(), prompt);

        let layout = Layout::default()
            .direction(layout::Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Title + prompt
                Constraint::Min(0),    // Board
            ])
            .split(frame.area());

        frame.render_widget(
            Paragraph::new(status)
                .alignment(Alignment::Left)
                .block(Block::default().borders(Borders::ALL)),
            layout[0],
        );

        // The board frame carries its own border
        frame.render_widget(Paragraph::new(self.board.render()), layout[1]);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Steer(Direction),
    Quit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GameEnd {
    Quit,
    Lost,
    Won,
    WonEarly,
}

// Single-value cell between the key listener and the turn loop.
// One writer, one reader, last keypress wins, nothing is queued.
#[derive(Clone, Default)]
struct InputSlot {
    shared: Arc<(Mutex<Option<Command>>, Condvar)>,
}

impl InputSlot {
    fn store(&self, command: Command) {
        let (lock, cvar) = &*self.shared;
        *lock.lock().unwrap() = Some(command);
        cvar.notify_one();
    }

    fn wait(&self) -> Command {
        let (lock, cvar) = &*self.shared;
        let mut slot = lock.lock().unwrap();
        loop {
            if let Some(command) = slot.take() {
                return command;
            }
            slot = cvar.wait(slot).unwrap();
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<Command> {
        let (lock, cvar) = &*self.shared;
        let deadline = Instant::now() + timeout;
        let mut slot = lock.lock().unwrap();
        loop {
            if let Some(command) = slot.take() {
                return Some(command);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = cvar.wait_timeout(slot, deadline - now).unwrap();
            slot = next;
        }
    }
}

fn spawn_listener() -> InputSlot {
    let slot = InputSlot::default();
    let writer = slot.clone();
    thread::spawn(move || listen(writer));
    slot
}

// Runs until the process exits; dropped keys never reach the game.
fn listen(slot: InputSlot) {
    loop {
        let event = match event::read() {
            Ok(event) => event,
            Err(e) => {
                error!("key listener stopped: {}", e);
                return;
            }
        };
        let Event::Key(key) = event else { continue };
        let command = match (key.code, key.modifiers) {
            (KeyCode::Char('c'), mods) if mods.contains(KeyModifiers::CONTROL) => Command::Quit,
            (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => Command::Quit,
            (KeyCode::Char(ch), _) => match Direction::from_key(ch) {
                Some(direction) => Command::Steer(direction),
                None => continue,
            },
            _ => continue,
        };
        slot.store(command);
    }
}
