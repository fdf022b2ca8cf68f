use std::env;
use std::error::Error;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use chip8vm::display::{ConsoleDisplay, MonoTermDisplay, MultiRenderer};
use chip8vm::input::{Input, InputEvent, StdinInput};
use chip8vm::sound::{Mute, SimpleBeep, Sound};
use chip8vm::vm::Vm;

/// instructions per second the machine targets
const TARGET_CYCLE_RATE: u64 = 500;
/// timer decrements per second
const TARGET_TIMER_RATE: u64 = 60;
/// presents per second
const TARGET_FRAME_RATE: u64 = 60;

/// terminals report no key releases, so a held key expires instead
const KEY_HOLD: Duration = Duration::from_millis(200);

struct Options {
    rom: String,
    console: bool,
    mute: bool,
    seed: Option<u64>,
}

fn usage(program: &str) {
    eprintln!("usage: {} [--console] [--mute] [--seed N] <rom.ch8>", program);
}

fn parse_args(args: &[String]) -> Option<Options> {
    let mut options = Options {
        rom: String::new(),
        console: false,
        mute: false,
        seed: None,
    };

    let mut rest = args[1..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--console" => options.console = true,
            "--mute" => options.mute = true,
            "--seed" => match rest.next().and_then(|v| v.parse().ok()) {
                Some(seed) => options.seed = Some(seed),
                None => return None,
            },
            _ if arg.starts_with("--") => return None,
            _ if options.rom.is_empty() => options.rom = arg.clone(),
            _ => return None,
        }
    }

    if options.rom.is_empty() {
        return None;
    }
    Some(options)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args) {
        Some(options) => options,
        None => {
            usage(&args[0]);
            return Ok(());
        }
    };

    let rom = fs::read(&options.rom)?;

    // the machine always draws through the fan-out, so additional sinks are
    // one `add` away
    let mut term_display;
    let mut console_display;
    let mut renderer = MultiRenderer::new();
    if options.console {
        console_display = ConsoleDisplay::new();
        renderer.add(&mut console_display);
    } else {
        term_display = MonoTermDisplay::new()?;
        renderer.add(&mut term_display);
    }

    let mut input = StdinInput::new();
    let mut simple_beep = SimpleBeep::new();
    let mut muted = Mute::new();
    let sound: &mut dyn Sound = if options.mute {
        &mut muted
    } else {
        &mut simple_beep
    };

    let mut vm = match options.seed {
        Some(seed) => Vm::with_seed(&mut renderer, seed),
        None => Vm::new(&mut renderer),
    };
    vm.load_program(&rom)?;

    run(&mut vm, &mut input, sound)
}

/// Poll input, then drive stepping, timers and presentation at their own
/// rates until the user quits or the machine faults.
fn run(vm: &mut Vm, input: &mut dyn Input, sound: &mut dyn Sound) -> Result<(), Box<dyn Error>> {
    let step_interval = Duration::from_nanos(1_000_000_000 / TARGET_CYCLE_RATE);
    let timer_interval = Duration::from_nanos(1_000_000_000 / TARGET_TIMER_RATE);
    let frame_interval = Duration::from_nanos(1_000_000_000 / TARGET_FRAME_RATE);

    let mut last_step = Instant::now();
    let mut last_timer = Instant::now();
    let mut last_frame = Instant::now();
    let mut key_seen: Option<Instant> = None;

    loop {
        let now = Instant::now();

        while let Some(event) = input.poll_key()? {
            match event {
                InputEvent::Key(key) => {
                    vm.key_down(key);
                    key_seen = Some(now);
                }
                InputEvent::Quit => return Ok(()),
            }
        }
        if let Some(at) = key_seen {
            if now.duration_since(at) >= KEY_HOLD {
                vm.key_up();
                key_seen = None;
            }
        }

        if now.duration_since(last_step) >= step_interval {
            if let Err(fault) = vm.step() {
                eprintln!("halted: {}", fault);
                eprintln!("{}", vm);
                return Err(fault.into());
            }
            last_step = now;
        }

        if now.duration_since(last_timer) >= timer_interval {
            vm.tick_timers();
            if vm.state().sound_timer() > 0 {
                sound.beep()?;
            } else {
                sound.stop()?;
            }
            last_timer = now;
        }

        if now.duration_since(last_frame) >= frame_interval {
            vm.present()?;
            last_frame = now;
        }

        thread::sleep(Duration::from_micros(250));
    }
}
