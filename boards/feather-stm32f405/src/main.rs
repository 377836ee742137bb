#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod bridge;
mod clock;
mod device_id;
mod eth;
mod events;
mod json;
mod network;
mod time;

stm32_tim2_monotonic!(Mono, 1_000_000);

/// Monotonic time on the engine's millisecond timeline
fn engine_now() -> clock_core::time::Instant {
    clock_core::time::Instant::from_ticks(Mono::now().ticks() / 1_000)
}

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2, USART3])]
mod app {
    use super::*;
    use clock_core::event::Event;
    use clock_core::SyncScheduler;
    use defmt::{error, info, warn};
    use embassy_futures::join::join3;
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::gpio::{Level, Output, Pull, Speed};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{Hse, HseMode, LsConfig, LseConfig, LseMode};
    use embassy_stm32::spi::{self, Spi};
    use embassy_stm32::time::Hertz;

    use bridge::{BusBridge, HttpBridge, LinkBridge};
    use clock::ClockApp;
    use network::config::{engine_config, NetworkConfig};

    type SpiPeripheral = embassy_stm32::Peri<'static, peripherals::SPI2>;
    type PinPB13 = embassy_stm32::Peri<'static, peripherals::PB13>;
    type PinPB15 = embassy_stm32::Peri<'static, peripherals::PB15>;
    type PinPB14 = embassy_stm32::Peri<'static, peripherals::PB14>;
    type PinPC6 = embassy_stm32::Peri<'static, peripherals::PC6>;
    type PinPC3 = embassy_stm32::Peri<'static, peripherals::PC3>;
    type PinPC2 = embassy_stm32::Peri<'static, peripherals::PC2>;
    type ExtiChannel = embassy_stm32::Peri<'static, peripherals::EXTI2>;
    type DmaTx = embassy_stm32::Peri<'static, peripherals::DMA1_CH4>;
    type DmaRx = embassy_stm32::Peri<'static, peripherals::DMA1_CH3>;

    struct NetworkPeripherals {
        spi: SpiPeripheral,
        sck: PinPB13,
        mosi: PinPB15,
        miso: PinPB14,
        cs: PinPC6,
        reset: PinPC3,
        int: PinPC2,
        exti: ExtiChannel,
        dma_tx: DmaTx,
        dma_rx: DmaRx,
    }

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("Desktop clock starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE, 32.768 kHz LSE (PC14/PC15)
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        // VCO / DIVQ(7) = 48 MHz
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        config.rcc.ls = LsConfig {
            rtc: embassy_stm32::rcc::RtcClockSource::LSE,
            lsi: false,
            lse: Some(LseConfig {
                frequency: Hertz(32_768),
                mode: LseMode::Oscillator(embassy_stm32::rcc::LseDrive::MediumHigh),
            }),
        };

        let p = embassy_stm32::init(config);

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        let timer_clock_hz = 84_000_000;
        Mono::start(timer_clock_hz);
        info!("TIM2 monotonic timer initialized at 1 MHz");

        time::init_time_system(p.RTC);

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        let net_periph = NetworkPeripherals {
            spi: p.SPI2,
            sck: p.PB13,
            mosi: p.PB15,
            miso: p.PB14,
            cs: p.PC6,
            reset: p.PC3,
            int: p.PC2,
            exti: p.EXTI2,
            dma_tx: p.DMA1_CH4,
            dma_rx: p.DMA1_CH3,
        };

        heartbeat::spawn().ok();
        tick::spawn().ok();
        engine::spawn().ok();
        network_task::spawn(net_periph).ok();

        (Shared {}, Local { led })
    }

    /// Heartbeat LED: slow blink when synced, fast blink while degraded
    #[task(priority = 1, local = [led])]
    async fn heartbeat(cx: heartbeat::Context) {
        loop {
            cx.local.led.set_high();
            Mono::delay(100.millis()).await;
            cx.local.led.set_low();
            if events::is_degraded() {
                Mono::delay(400.millis()).await;
            } else {
                Mono::delay(4900.millis()).await;
            }
        }
    }

    /// Periodic scheduler tick
    #[task(priority = 1)]
    async fn tick(_cx: tick::Context) {
        loop {
            Mono::delay(1.secs()).await;
            events::try_post(Event::Tick);
        }
    }

    /// Sync engine: the only owner of the scheduler
    ///
    /// Drains the event queue one event at a time, so engine logic never
    /// runs in interrupt context or concurrently with itself.
    #[task(priority = 1)]
    async fn engine(_cx: engine::Context) {
        let config = engine_config();
        let mut app = ClockApp::new(config.intervals);
        let http = HttpBridge::new(config.endpoints.clone());
        let mut scheduler = SyncScheduler::new(config, LinkBridge, BusBridge::new(), http);
        info!("Sync engine started");

        // Report the shipped settings once a session exists
        if let Some(report) = app.settings_report() {
            events::post_settings(report.as_bytes());
        }

        loop {
            let event = events::next_event().await;
            let now = engine_now();
            app.set_uptime(now.ticks() / 1_000);

            if let Err(e) = scheduler.handle(event, now, &mut app) {
                warn!("Event not applied: {:?}", e);
            }

            if let Some(requested) = app.take_interval_update() {
                let applied = scheduler.set_intervals(requested);
                app.intervals_applied(applied);
                info!("Sync intervals now {:?}", applied);
                if let Some(report) = app.settings_report() {
                    events::post_settings(report.as_bytes());
                }
            }

            events::set_degraded(scheduler.status().is_degraded());
        }
    }

    /// Network task - owns the embassy-net stack and every runner
    ///
    /// Stack is !Send and must remain within this task.
    #[task(priority = 1)]
    async fn network_task(_cx: network_task::Context, periph: NetworkPeripherals) {
        use embassy_net::{Config, StackResources};
        use static_cell::StaticCell;

        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(10_000_000); // 10 MHz for W5500

        let spi = Spi::new(
            periph.spi,
            periph.sck,
            periph.mosi,
            periph.miso,
            periph.dma_tx,
            periph.dma_rx,
            spi_config,
        );

        let cs = Output::new(periph.cs, Level::High, Speed::VeryHigh);
        let reset = Output::new(periph.reset, Level::High, Speed::Low);
        let int = ExtiInput::new(periph.int, periph.exti, Pull::Up);

        let eth_periph = eth::EthPeripherals {
            spi,
            cs,
            reset,
            int,
        };

        let net_config = NetworkConfig::from_uid(device_id::uid());
        let (device, mut w5500_runner) = match eth::init_w5500(eth_periph, net_config.mac_addr).await
        {
            Ok(parts) => parts,
            Err(e) => {
                error!("Network unavailable: {:?}", e);
                return;
            }
        };

        // DHCP and DNS sockets, plus one TCP socket each for MQTT and both HTTP runners
        static RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();
        let (stack, mut net_runner) = embassy_net::new(
            device,
            Config::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            net_config.seed,
        );
        info!("Network stack initialized with DHCP");

        let (never, _, _) = join3(w5500_runner.run(), net_runner.run(), network::run(stack)).await;
        never
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }
}
