//! # Pose Estimator Benchmark

use criterion::{criterion_group, criterion_main, Criterion};

use robot_lib::drive::{
    ModulePositions, PoseEstimator, SwerveKinematics, SwerveModulePosition, NUM_MODULES,
};
use util::geom::{Pose2d, Rotation2d};

/// Odometry rate of the real robot.
const ODOMETRY_PERIOD_S: f64 = 0.005;

fn positions(distance_m: f64, angle: Rotation2d) -> ModulePositions {
    [Some(SwerveModulePosition::new(distance_m, angle)); NUM_MODULES]
}

/// An estimator with a full buffer, driving a gentle arc at 2 m/s.
fn full_estimator() -> (PoseEstimator, f64) {
    let kinematics = SwerveKinematics::new([[0.3, 0.3], [0.3, -0.3], [-0.3, 0.3], [-0.3, -0.3]]);
    let mut est = PoseEstimator::new(
        kinematics,
        [0.01, 0.01, 0.01],
        [0.1, 0.1, 9999999.0],
        1.5,
        Some(3.0),
    );

    let steer = Rotation2d::from_degrees(10.0);
    est.reset_pose(Pose2d::default(), 0.0, Some(Rotation2d::default()), positions(0.0, steer));

    let num_samples = (1.5 / ODOMETRY_PERIOD_S) as usize;
    let mut t = 0.0;
    for i in 1..=num_samples {
        t = i as f64 * ODOMETRY_PERIOD_S;
        let yaw = Rotation2d::from_radians(0.2 * t);
        est.update(t, Some(yaw), positions(2.0 * t, steer)).unwrap();
    }

    (est, t)
}

fn estimator_benchmark(c: &mut Criterion) {
    let (est, now_s) = full_estimator();

    c.bench_function("PoseEstimator::update", |b| {
        let mut e = est.clone();
        let mut t = now_s;
        b.iter(|| {
            t += ODOMETRY_PERIOD_S;
            let yaw = Rotation2d::from_radians(0.2 * t);
            e.update(t, Some(yaw), positions(2.0 * t, Rotation2d::default()))
                .unwrap()
        })
    });

    // Worst case: the measurement lands at the oldest sample so every later one is replayed
    c.bench_function("PoseEstimator::add_vision_measurement::oldest", |b| {
        b.iter_batched(
            || est.clone(),
            |mut e| {
                let pose = e.pose();
                e.add_vision_measurement(&pose, now_s - 1.49).ok()
            },
            criterion::BatchSize::SmallInput,
        )
    });

    c.bench_function("PoseEstimator::add_vision_measurement::latest", |b| {
        b.iter_batched(
            || est.clone(),
            |mut e| {
                let pose = e.pose();
                e.add_vision_measurement(&pose, now_s).ok()
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, estimator_benchmark);
criterion_main!(benches);
