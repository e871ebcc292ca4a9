//! Run detection and description on an image file and print the counts.

use sift_compute::{input_from_gray, Sift, SiftConfig};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let path = match args.get(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: run-sift IMAGE");
            return;
        }
    };
    let img = match image::open(path).unwrap().grayscale() {
        image::DynamicImage::ImageLuma8(img) => img,
        _ => {
            eprintln!("wrong image type");
            return;
        }
    };

    let input = input_from_gray(&img);
    let mut sift = Sift::new(SiftConfig::new(
        img.width() as usize,
        img.height() as usize,
    ))
    .unwrap();
    let keypoints = sift.detect(input.view()).unwrap();
    let descriptors = sift.describe(&keypoints).unwrap();

    for (o, (kps, descs)) in keypoints.iter().zip(&descriptors).enumerate() {
        println!("octave {o}: {} keypoints, {} descriptors", kps.len(), descs.len());
    }
    let total_kp: usize = keypoints.iter().map(Vec::len).sum();
    let total_desc: usize = descriptors.iter().map(Vec::len).sum();
    println!("{total_kp} keypoints, {total_desc} descriptors");
}
