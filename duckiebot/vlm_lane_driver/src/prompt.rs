use lane_pilot_lib::{Conversation, EncodedFrame, Role, Segment, Turn};

/// Role, goal, viewpoint, road semantics and the required output grammar
const INSTRUCTIONS: &str = "Follow this instruction for any photos that I give to you and provide me with the output\n\n\
<General instruction block>\n\
You are an expert driver of the car.\n\
Your job is to give a velocity and direction pattern based on the input for now, 0.2 seconds later, and 0.4 seconds later from the current time.\n\
Your goal is to safely drive without damaging any ducks which are civilians in our town and explore the city. \n\
The input is an image 64 * 64 from the driver's point of view. You have to decide the action based on the current position of the car. \
The bottom of the image is the closest part to the car.\n\
The street is divided into two ways by yellow dashed lines. The road boundary is marked by white lines on both sides of the road.\n\
You will always give the output in the correct format no matter what the input is.\n\n\
<Output format definition block>\n\
The following are rules for describing the velocity and direction pattern:\n\
1. You should first output the velocity, then the direction for the current time, then the velocity for 0.2 sec later and \
the direction for that time, and then the velocity for 0.4 sec and the direction for that.\n\
2. There are two velocities to choose from: [0.0, 0.2].\n\
3. A direction could be written as LL, L, F, R, RR, and S for 45 degrees to left, 20 degrees to left, forward, \
20 degrees to right, 45 degrees to right, and stop.\n\n\
<Examples block>\nInput:";

/// Worked examples: reference image and the expected three-line answer
const EXAMPLES: [(&str, &str); 3] = [
    ("https://i.ibb.co/JH2XQxG/example1.png", "0.2 F\n0.2 L\n0.2 L"),
    ("https://i.ibb.co/sWzDFsp/example2.png", "0.2 F\n0.2 F\n0.2 F"),
    ("https://i.ibb.co/0c9Ysxp/example3.png", "0.2 RR\n0.2 R\n0.2 R"),
];

const ACKNOWLEDGEMENT: &str =
    "Please provide the image you want analyzed for the driving simulation instructions.";

/// Builds the per-frame conversation: a fixed preamble plus the current frame
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    preamble: Vec<Turn>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut content = vec![Segment::text(INSTRUCTIONS)];
        for (i, (url, output)) in EXAMPLES.iter().enumerate() {
            content.push(Segment::image(*url));
            let trailer = if i + 1 < EXAMPLES.len() { "\nInput:" } else { "" };
            content.push(Segment::text(format!("Output:\n{}{}", output, trailer)));
        }

        Self {
            preamble: vec![
                Turn::new(Role::User, content),
                Turn::new(Role::Assistant, vec![Segment::text(ACKNOWLEDGEMENT)]),
            ],
        }
    }

    pub fn build(&self, frame: &EncodedFrame) -> Conversation {
        let mut turns = self.preamble.clone();
        turns.push(Turn::new(Role::User, vec![Segment::image(frame.data_url())]));
        Conversation::new(turns)
    }
}
